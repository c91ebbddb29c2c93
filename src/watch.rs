//! Watch mode.
//!
//! A [`Watcher`] maps glob patterns to actions: run a [`TaskNode`] and then
//! optionally notify the browser, or just ask the browser to reload. Events
//! come from `notify`, debounced, and are handed to a [`Dispatcher`] that
//! fires every matching rule on its own worker thread.
//!
//! A rule never runs twice at once. Changes that arrive while its task is
//! running are collapsed into a single follow-up run once it completes.
//! A failing task is logged and the watcher carries on.

use std::collections::HashSet;
use std::path::Path;
use std::sync::mpsc::{Sender, channel};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{Debouncer, RecommendedCache, new_debouncer};

use crate::error::WatchError;
use crate::io::{MATCH, anchored};
use crate::server::Signal;
use crate::task::TaskNode;

#[derive(Debug)]
pub enum Action {
    /// Run a task graph, then push `then` to the browser if it succeeded.
    Run { node: TaskNode, then: Option<Signal> },
    /// Only tell the browser to reload.
    Reload,
}

#[derive(Debug)]
pub struct WatchRule {
    pattern: Pattern,
    action: Action,
    debounce: Option<Duration>,
}

impl WatchRule {
    pub fn run(glob: &str, node: TaskNode) -> Result<Self, WatchError> {
        Ok(Self {
            pattern: Pattern::new(glob)?,
            action: Action::Run { node, then: None },
            debounce: None,
        })
    }

    pub fn reload(glob: &str) -> Result<Self, WatchError> {
        Ok(Self {
            pattern: Pattern::new(glob)?,
            action: Action::Reload,
            debounce: None,
        })
    }

    /// Signal sent after a successful run.
    pub fn then(mut self, signal: Signal) -> Self {
        if let Action::Run { then, .. } = &mut self.action {
            *then = Some(signal);
        }
        self
    }

    /// Extra quiet period before each run, on top of the watcher's own
    /// debouncing.
    pub fn debounce(mut self, interval: Duration) -> Self {
        self.debounce = Some(interval);
        self
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn matches(&self, path: &Path) -> bool {
        self.pattern.matches_path_with(path, MATCH)
    }
}

#[derive(Debug, Default)]
struct RuleState {
    running: bool,
    pending: bool,
}

#[derive(Debug)]
struct Slot {
    rule: WatchRule,
    state: Mutex<RuleState>,
}

impl Slot {
    fn state(&self) -> MutexGuard<'_, RuleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn execute(&self, signals: Option<&Sender<Signal>>) {
        let signal = match &self.rule.action {
            Action::Run { node, then } => match node.run() {
                Ok(()) => *then,
                Err(e) => {
                    tracing::error!("{e}");
                    None
                }
            },
            Action::Reload => Some(Signal::Reload),
        };

        // fire and forget, nobody listening is fine
        if let (Some(signal), Some(tx)) = (signal, signals) {
            tx.send(signal).ok();
        }
    }
}

/// Routes changed paths to rules, enforcing one run at a time per rule.
#[derive(Debug)]
pub struct Dispatcher {
    slots: Vec<Arc<Slot>>,
    signals: Option<Sender<Signal>>,
}

impl Dispatcher {
    pub fn new(rules: Vec<WatchRule>, signals: Option<Sender<Signal>>) -> Self {
        let slots = rules
            .into_iter()
            .map(|rule| {
                Arc::new(Slot {
                    rule,
                    state: Mutex::default(),
                })
            })
            .collect();

        Self { slots, signals }
    }

    /// Triggers each rule matching any of `paths` once. Returns the number
    /// of rules triggered.
    pub fn dispatch<P: AsRef<Path>>(&self, paths: &[P]) -> usize {
        let mut fired = 0;

        for slot in &self.slots {
            if paths.iter().any(|path| slot.rule.matches(path.as_ref())) {
                tracing::debug!("change matches {}", slot.rule.pattern());
                self.trigger(slot.clone());
                fired += 1;
            }
        }

        fired
    }

    /// Whether no rule is running or waiting for a follow-up run.
    pub fn is_idle(&self) -> bool {
        self.slots.iter().all(|slot| {
            let state = slot.state();
            !state.running && !state.pending
        })
    }

    fn trigger(&self, slot: Arc<Slot>) {
        {
            let mut state = slot.state();
            if state.running {
                state.pending = true;
                return;
            }
            state.running = true;
        }

        let signals = self.signals.clone();
        thread::spawn(move || {
            loop {
                if let Some(interval) = slot.rule.debounce {
                    thread::sleep(interval);
                }

                // this run covers every change seen so far
                slot.state().pending = false;
                slot.execute(signals.as_ref());

                let mut state = slot.state();
                if !state.pending {
                    state.running = false;
                    break;
                }
            }
        });
    }
}

/// Active watch handles. Dropping the value stops watching.
pub struct Watcher {
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    dispatcher: Arc<Dispatcher>,
}

impl Watcher {
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

/// Starts watching the static roots of every rule's pattern.
///
/// Rules whose root directory doesn't exist are skipped with a warning.
pub fn watch(
    rules: Vec<WatchRule>,
    debounce: Duration,
    signals: Option<Sender<Signal>>,
) -> Result<Watcher, WatchError> {
    let mut roots = HashSet::new();
    let mut active = Vec::new();

    for mut rule in rules {
        match resolve_watch_path(rule.pattern()) {
            Ok((root, pattern)) => {
                roots.insert(root);
                rule.pattern = pattern;
                active.push(rule);
            }
            Err(e) => tracing::warn!("not watching {}: {e}", rule.pattern()),
        }
    }

    let dispatcher = Arc::new(Dispatcher::new(active, signals));

    let (tx, rx) = channel();
    let mut debouncer = new_debouncer(debounce, None, tx)?;

    // Collapse watched paths to reduce the number of watches
    for path in collapse_watch_paths(roots) {
        tracing::info!("watching {path}");
        debouncer.watch(path.as_std_path(), RecursiveMode::Recursive)?;
    }

    let events = dispatcher.clone();
    thread::spawn(move || {
        // ends once the debouncer is dropped
        for result in rx {
            match result {
                Ok(batch) => {
                    let paths: Vec<_> = batch
                        .iter()
                        .filter(|de| {
                            matches!(
                                de.event.kind,
                                EventKind::Create(..)
                                    | EventKind::Modify(..)
                                    | EventKind::Remove(..)
                            )
                        })
                        .flat_map(|de| &de.event.paths)
                        .collect();

                    if !paths.is_empty() && events.dispatch(&paths) == 0 {
                        tracing::trace!("{} changed path(s) matched no rule", paths.len());
                    }
                }
                Err(errors) => {
                    for e in errors {
                        tracing::error!("watch error: {e}");
                    }
                }
            }
        }
    });

    Ok(Watcher {
        _debouncer: debouncer,
        dispatcher,
    })
}

/// Splits a glob string into a canonicalized static root path (for
/// watching) and a compiled absolute Pattern (for matching).
pub fn resolve_watch_path(glob_str: &str) -> Result<(Utf8PathBuf, Pattern), WatchError> {
    let path = Utf8Path::new(glob_str);

    // Split path into static root and dynamic suffix (containing wildcards)
    let components: Vec<_> = path.components().collect();
    let split_idx = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or(components.len());

    let root_part: Utf8PathBuf = components.iter().take(split_idx).collect();
    let suffix_part: Utf8PathBuf = components.iter().skip(split_idx).collect();

    let root_part = if root_part.as_str().is_empty() {
        Utf8PathBuf::from(".")
    } else {
        root_part
    };

    // The static root must exist on disk
    let absolute_root = root_part.canonicalize_utf8()?;

    // A concrete file is watched through its parent, so that atomic writes
    // replacing the file are caught too.
    if suffix_part.as_str().is_empty() && absolute_root.is_file() {
        let parent = absolute_root
            .parent()
            .unwrap_or(&absolute_root)
            .to_path_buf();
        let pattern = Pattern::new(&Pattern::escape(absolute_root.as_str()))?;
        return Ok((parent, pattern));
    }

    // A bare directory matches everything below it
    let suffix = match suffix_part.as_str() {
        "" => "**",
        suffix => suffix,
    };
    let pattern = Pattern::new(&anchored(&absolute_root, suffix))?;

    Ok((absolute_root, pattern))
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `/a` and `/a/b`, we only need to watch `/a` because
/// the watcher is recursive.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}
