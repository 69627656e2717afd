//! Filesystem-state graph → multi-stage Dockerfile.
//!
//! Every graph node becomes one stage named `sN`, numbered in the order the
//! renderer first reaches it, so rendering the same graph twice produces the
//! same text. Nodes reachable from several places (a base shared by two
//! platforms, a state used both as a parent and as a copy source) are
//! rendered once.
//!
//! Run steps never inline their script: each one is written to the build
//! context as `steps/N.sh` and bind-mounted into the step. File writes land in
//! the context as `files/N`. Host directories become named build contexts.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::path::PathBuf;

use bytes::Bytes;
use layerfix_core::state::{FsState, Op, RunSpec};
use layerfix_core::types::Platform;

/// Target stage name of a multi-platform render.
pub const EXPORT_STAGE: &str = "layerfix-export";

/// Mount point of the current step's script.
const STEP_MOUNT: &str = "/.layerfix-step.sh";

/// A file placed in the main build context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextFile {
    /// Path relative to the context root.
    pub path: String,
    pub data: Bytes,
}

/// Output of one render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedBuild {
    pub dockerfile: String,
    /// Stage to build.
    pub target: String,
    /// Named build contexts (`--build-context name=path`).
    pub contexts: BTreeMap<String, PathBuf>,
    /// Files for the main build context.
    pub files: Vec<ContextFile>,
}

/// Renders the graph ending at `state`.
pub fn render_dockerfile(state: &FsState) -> RenderedBuild {
    let mut renderer = Renderer::default();
    let target = renderer.stage(state);
    renderer.finish(target)
}

/// Renders one graph per platform plus an export stage that picks the
/// platform's final stage from the `TARGET*` build arguments.
pub fn render_multi_platform(targets: &[(Platform, FsState)]) -> RenderedBuild {
    let mut renderer = Renderer::default();
    renderer.header.push_str("ARG TARGETOS\nARG TARGETARCH\nARG TARGETVARIANT\n");

    let mut aliases = BTreeMap::new();
    for (platform, state) in targets {
        let stage = renderer.stage(state);
        for alias in final_stage_names(platform) {
            aliases.insert(alias, stage.clone());
        }
    }

    let mut tail = String::new();
    for (alias, stage) in &aliases {
        let _ = writeln!(tail, "\nFROM {stage} AS {alias}");
    }
    let _ = writeln!(
        tail,
        "\nFROM final-${{TARGETOS}}-${{TARGETARCH}}${{TARGETVARIANT}} AS {EXPORT_STAGE}"
    );
    renderer.body.push_str(&tail);
    renderer.finish(EXPORT_STAGE.to_owned())
}

/// Alias stages for one platform: `final-<os>-<arch><variant>`, which is
/// what the export stage's `FROM` expands to. `arm64/v8` gets both spellings
/// since builders disagree on whether `TARGETVARIANT` is set for it.
pub fn final_stage_names(platform: &Platform) -> Vec<String> {
    let name = |p: &Platform| format!("final-{}-{}{}", p.os, p.architecture, p.variant);
    let mut names = vec![name(&platform.normalized())];
    let raw = name(platform);
    if !names.contains(&raw) {
        names.push(raw);
    }
    names
}

#[derive(Default)]
struct Renderer {
    header: String,
    body: String,
    stages: HashMap<usize, String>,
    next_stage: usize,
    contexts: BTreeMap<String, PathBuf>,
    files: Vec<ContextFile>,
}

impl Renderer {
    /// Renders `state` and everything it depends on; returns its stage name.
    fn stage(&mut self, state: &FsState) -> String {
        let mut last = String::new();
        for node in state.ancestry() {
            last = match self.stages.get(&node.node_id()) {
                Some(name) => name.clone(),
                None => self.render_node(&node, &last),
            };
        }
        last
    }

    fn render_node(&mut self, node: &FsState, parent: &str) -> String {
        // copy sources first so their stages precede this one
        let copy_source = match node.op() {
            Op::Copy { from, .. } => Some(self.stage(from)),
            _ => None,
        };

        let name = format!("s{}", self.next_stage);
        self.next_stage += 1;

        let mut out = String::new();
        match node.op() {
            Op::Image {
                reference,
                platform,
            } => {
                let _ = writeln!(out, "FROM --platform={} {reference} AS {name}", platform.spec());
            }
            Op::Local { path } => {
                let context = format!("ctx{}", self.contexts.len());
                self.contexts.insert(context.clone(), path.clone());
                let _ = writeln!(out, "FROM scratch AS {name}");
                let _ = writeln!(out, "COPY --from={context} / /");
            }
            Op::Run(spec) => {
                let _ = writeln!(out, "FROM {parent} AS {name}");
                out.push_str(&self.run_instruction(spec));
            }
            Op::MkFile { path, mode, data } => {
                let file = format!("files/{}", self.files.len());
                self.files.push(ContextFile {
                    path: file.clone(),
                    data: data.clone(),
                });
                let _ = writeln!(out, "FROM {parent} AS {name}");
                let _ = writeln!(out, "COPY --chmod={mode:o} {}", json_paths(&file, path));
            }
            Op::Copy { src, dest, .. } => {
                let from = copy_source.unwrap_or_default();
                let _ = writeln!(out, "FROM {parent} AS {name}");
                let _ = writeln!(out, "COPY --from={from} {}", json_paths(src, dest));
            }
        }

        self.body.push('\n');
        self.body.push_str(&out);
        self.stages.insert(node.node_id(), name.clone());
        name
    }

    fn run_instruction(&mut self, spec: &RunSpec) -> String {
        let script = format!("steps/{}.sh", self.files.len());
        self.files.push(ContextFile {
            path: script.clone(),
            data: Bytes::from(spec.script.clone()),
        });

        let mut line = format!("# {}\n", single_line(&spec.name));
        let _ = write!(line, "RUN --mount=type=bind,source={script},target={STEP_MOUNT}");
        for (key, value) in &spec.env {
            let _ = write!(line, " {key}={}", shell_quote(value));
        }
        let _ = writeln!(line, " /bin/sh {STEP_MOUNT}");
        line
    }

    fn finish(self, target: String) -> RenderedBuild {
        let mut dockerfile = String::from("# syntax=docker/dockerfile:1\n");
        dockerfile.push_str(&self.header);
        dockerfile.push_str(&self.body);
        RenderedBuild {
            dockerfile,
            target,
            contexts: self.contexts,
            files: self.files,
        }
    }
}

fn json_paths(src: &str, dest: &str) -> String {
    let quote = |s: &str| serde_json::Value::from(s).to_string();
    format!("[{}, {}]", quote(src), quote(dest))
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn single_line(s: &str) -> String {
    s.replace(['\n', '\r'], " ")
}
