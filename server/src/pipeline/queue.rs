use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

/// Job queue loaded once with every message id of a run.
///
/// Nothing is pushed after construction, so an empty pop means the run has
/// no work left and the worker can exit.
#[derive(Debug, Clone, Default)]
pub struct JobQueue {
    inner: Arc<Mutex<VecDeque<String>>>,
}

impl JobQueue {
    pub fn preloaded(ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ids.into_iter().collect())),
        }
    }

    pub fn pop(&self) -> Option<String> {
        let mut inner = self.inner.lock().unwrap();
        inner.pop_front()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
