//! Immutable filesystem-state graph.
//!
//! An [`FsState`] is a handle to a node in a persistent graph describing how
//! a root filesystem is produced: start from an image or a host directory,
//! then run commands, write files and copy trees between states. Deriving a
//! state never changes the state it was derived from, so a base handle can be
//! branched freely (one branch for probing, another for the real update).
//!
//! Nothing is evaluated here. A [`BuildEngine`](crate::engine::BuildEngine)
//! solves a graph only when a file is read, an image committed, or a layout
//! exported.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;

use crate::types::Platform;

/// One shell step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    /// Short label shown in build logs.
    pub name: String,
    /// Script passed to `/bin/sh -c`.
    pub script: String,
    /// Environment for this step only. Keys are applied in order.
    pub env: Vec<(String, String)>,
}

impl RunSpec {
    /// Creates a step with no environment.
    pub fn new(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
            env: Vec::new(),
        }
    }

    /// Adds one environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Looks up an environment variable set on this step.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Graph operation carried by a node.
#[derive(Debug, Clone)]
pub enum Op {
    /// Root filesystem of an image for one platform.
    Image {
        reference: String,
        platform: Platform,
    },
    /// Contents of a host directory.
    Local { path: PathBuf },
    /// Shell step on top of the parent.
    Run(RunSpec),
    /// Write a single file on top of the parent.
    MkFile {
        path: String,
        mode: u32,
        data: Bytes,
    },
    /// Copy `src` out of another state onto `dest` in the parent.
    Copy {
        from: FsState,
        src: String,
        dest: String,
    },
}

impl Op {
    /// Whether this operation starts a new graph.
    pub fn is_source(&self) -> bool {
        matches!(self, Op::Image { .. } | Op::Local { .. })
    }
}

#[derive(Debug)]
struct Node {
    op: Op,
    parent: Option<FsState>,
    depth: usize,
}

/// Handle to a node in the filesystem-state graph.
///
/// Cloning is cheap. Equality is identity: two handles are equal when they
/// point at the same node.
#[derive(Clone)]
pub struct FsState(Arc<Node>);

impl FsState {
    /// Starts from an image root filesystem.
    pub fn image(reference: impl Into<String>, platform: Platform) -> Self {
        Self::source(Op::Image {
            reference: reference.into(),
            platform: platform.normalized(),
        })
    }

    /// Starts from a host directory.
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::source(Op::Local { path: path.into() })
    }

    fn source(op: Op) -> Self {
        Self(Arc::new(Node {
            op,
            parent: None,
            depth: 0,
        }))
    }

    fn derive(&self, op: Op) -> Self {
        Self(Arc::new(Node {
            op,
            parent: Some(self.clone()),
            depth: self.0.depth + 1,
        }))
    }

    /// Appends a shell step.
    pub fn run(&self, spec: RunSpec) -> Self {
        self.derive(Op::Run(spec))
    }

    /// Appends a file write.
    pub fn mkfile(&self, path: impl Into<String>, mode: u32, data: impl Into<Bytes>) -> Self {
        self.derive(Op::MkFile {
            path: path.into(),
            mode,
            data: data.into(),
        })
    }

    /// Appends a copy of `src` from `from` onto `dest`.
    pub fn copy_from(
        &self,
        from: &FsState,
        src: impl Into<String>,
        dest: impl Into<String>,
    ) -> Self {
        self.derive(Op::Copy {
            from: from.clone(),
            src: src.into(),
            dest: dest.into(),
        })
    }

    /// Operation of this node.
    pub fn op(&self) -> &Op {
        &self.0.op
    }

    /// State this node was derived from.
    pub fn parent(&self) -> Option<&FsState> {
        self.0.parent.as_ref()
    }

    /// Number of operations applied on top of the source.
    pub fn depth(&self) -> usize {
        self.0.depth
    }

    /// Nodes from the source to this node, inclusive.
    pub fn ancestry(&self) -> Vec<FsState> {
        let mut chain = Vec::with_capacity(self.depth() + 1);
        let mut cursor = Some(self.clone());
        while let Some(node) = cursor {
            cursor = node.parent().cloned();
            chain.push(node);
        }
        chain.reverse();
        chain
    }

    /// Source node at the bottom of this chain.
    pub fn source_node(&self) -> FsState {
        let mut cursor = self.clone();
        while let Some(parent) = cursor.parent().cloned() {
            cursor = parent;
        }
        cursor
    }

    /// Platform of the image this chain starts from.
    pub fn platform(&self) -> Option<Platform> {
        match self.source_node().op() {
            Op::Image { platform, .. } => Some(platform.clone()),
            _ => None,
        }
    }

    /// Shell steps in this chain, oldest first.
    pub fn runs(&self) -> Vec<RunSpec> {
        self.ancestry()
            .iter()
            .filter_map(|s| match s.op() {
                Op::Run(spec) => Some(spec.clone()),
                _ => None,
            })
            .collect()
    }

    /// Identity comparison.
    pub fn same_as(&self, other: &FsState) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Stable pointer used to deduplicate shared nodes while rendering.
    pub fn node_id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl PartialEq for FsState {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl Eq for FsState {}

impl fmt::Debug for FsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for node in self.ancestry() {
            let label = match node.op() {
                Op::Image {
                    reference,
                    platform,
                } => format!("image({reference}, {platform})"),
                Op::Local { path } => format!("local({})", path.display()),
                Op::Run(spec) => format!("run({})", spec.name),
                Op::MkFile { path, .. } => format!("mkfile({path})"),
                Op::Copy { src, dest, .. } => format!("copy({src} -> {dest})"),
            };
            list.entry(&format_args!("{label}"));
        }
        list.finish()
    }
}
