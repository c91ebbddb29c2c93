//! Tasks and their composition.
//!
//! A [`Task`] is a named, zero-argument unit of work whose side effects land
//! in the file system. Tasks are composed into a [`TaskNode`] tree with
//! [`series`] and [`parallel`]:
//!
//! - `series` runs its children one at a time in listed order and stops at
//!   the first failure.
//! - `parallel` starts every child at once on its own thread and waits for
//!   all of them. Siblings of a failing branch are never cancelled; the
//!   composite reports the first failure it observed.
//!
//! Nodes nest to any depth, and an empty node trivially succeeds.

use std::borrow::Cow;
use std::fmt::{Debug, Display};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc::channel;
use std::thread;
use std::time::Instant;

use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::error::{BuildError, TaskError};

/// Result of a single leaf task.
pub type TaskResult = Result<(), BuildError>;

type TaskFn = Arc<dyn Fn() -> TaskResult + Send + Sync>;

/// A named unit of build work.
#[derive(Clone)]
pub struct Task {
    name: Cow<'static, str>,
    func: TaskFn,
}

impl Task {
    pub fn new<F>(name: impl Into<Cow<'static, str>>, func: F) -> Self
    where
        F: Fn() -> TaskResult + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the task once. Panics inside the task are turned into failures.
    pub fn run(&self) -> Result<(), TaskError> {
        let span = tracing::span!(Level::INFO, "task", name = %self.name);
        span.pb_set_style(crate::io::task_style());
        span.pb_set_message(&format!("Running {}", self.name));
        let _enter = span.enter();

        let start = Instant::now();
        tracing::debug!("starting");

        let result = match catch_unwind(AssertUnwindSafe(|| (self.func)())) {
            Ok(result) => result,
            Err(panic) => {
                let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    s.clone()
                } else {
                    String::from("unknown payload")
                };

                Err(BuildError::Panicked(msg))
            }
        };

        match result {
            Ok(()) => {
                tracing::info!("finished {} {}", self.name, crate::io::as_overhead(start));
                Ok(())
            }
            Err(source) => {
                tracing::error!("{} failed {}", self.name, crate::io::as_overhead(start));
                Err(TaskError {
                    task: self.name.to_string(),
                    source,
                })
            }
        }
    }
}

impl Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Task({})", self.name)
    }
}

/// A leaf task or a series/parallel composition of nodes.
#[derive(Clone, Debug)]
pub enum TaskNode {
    Leaf(Task),
    Series(Vec<TaskNode>),
    Parallel(Vec<TaskNode>),
}

impl From<Task> for TaskNode {
    fn from(task: Task) -> Self {
        TaskNode::Leaf(task)
    }
}

/// Runs `nodes` strictly one after another, stopping at the first failure.
pub fn series<I>(nodes: I) -> TaskNode
where
    I: IntoIterator,
    I::Item: Into<TaskNode>,
{
    TaskNode::Series(nodes.into_iter().map(Into::into).collect())
}

/// Runs `nodes` concurrently; succeeds only if every branch succeeds.
pub fn parallel<I>(nodes: I) -> TaskNode
where
    I: IntoIterator,
    I::Item: Into<TaskNode>,
{
    TaskNode::Parallel(nodes.into_iter().map(Into::into).collect())
}

impl TaskNode {
    pub fn run(&self) -> Result<(), TaskError> {
        match self {
            TaskNode::Leaf(task) => task.run(),
            TaskNode::Series(nodes) => {
                for node in nodes {
                    node.run()?;
                }
                Ok(())
            }
            TaskNode::Parallel(nodes) => run_parallel(nodes),
        }
    }

    /// All leaf tasks in listed order.
    pub fn leaves(&self) -> Vec<&Task> {
        match self {
            TaskNode::Leaf(task) => vec![task],
            TaskNode::Series(nodes) | TaskNode::Parallel(nodes) => {
                nodes.iter().flat_map(TaskNode::leaves).collect()
            }
        }
    }
}

fn run_parallel(nodes: &[TaskNode]) -> Result<(), TaskError> {
    match nodes {
        [] => return Ok(()),
        [only] => return only.run(),
        _ => {}
    }

    let (tx, rx) = channel();

    // The scope joins every branch before returning, so the composite never
    // reports before the slowest branch is done.
    thread::scope(|s| {
        for node in nodes {
            let tx = tx.clone();
            s.spawn(move || {
                // the receiver outlives the scope
                let _ = tx.send(node.run());
            });
        }
    });
    drop(tx);

    // Results arrive in completion order.
    match rx.into_iter().find_map(Result::err) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

impl Display for TaskNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (kind, nodes) = match self {
            TaskNode::Leaf(task) => return write!(f, "{}", task.name),
            TaskNode::Series(nodes) => ("series", nodes),
            TaskNode::Parallel(nodes) => ("parallel", nodes),
        };

        write!(f, "{kind}(")?;
        for (i, node) in nodes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{node}")?;
        }
        write!(f, ")")
    }
}
