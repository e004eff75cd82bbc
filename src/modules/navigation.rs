use std::sync::Mutex;

use log::info;

/// Listing page the admin returns to after publishing a movie.
pub const DEFAULT_LISTING_PATH: &str = "/dashboard/movies";

pub trait Navigator: Send + Sync {
    fn navigate(&self, path: &str);
}

/// Navigator for headless front ends: logs the target and nothing else.
#[derive(Debug, Default)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn navigate(&self, path: &str) {
        info!("Navigate to {path}");
    }
}

/// Keeps every navigation so a front end (or a test) can replay it.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    visited: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn visited(&self) -> Vec<String> {
        match self.visited.lock() {
            Ok(visited) => visited.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn last(&self) -> Option<String> {
        self.visited().pop()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, path: &str) {
        info!("Navigate to {path}");
        match self.visited.lock() {
            Ok(mut visited) => visited.push(path.to_string()),
            Err(poisoned) => poisoned.into_inner().push(path.to_string()),
        }
    }
}

impl<N: Navigator + ?Sized> Navigator for std::sync::Arc<N> {
    fn navigate(&self, path: &str) {
        (**self).navigate(path)
    }
}
