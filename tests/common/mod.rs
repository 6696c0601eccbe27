#![allow(dead_code)]

pub use sauceci_test_utils::{init_tracing, with_timeout};

use std::error::Error;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

pub type TestResult = Result<(), Box<dyn Error>>;

/// Counts completion callbacks and remembers the codes they carried.
#[derive(Debug, Clone, Default)]
pub struct CallbackProbe {
    calls: Arc<AtomicU32>,
    codes: Arc<Mutex<Vec<i32>>>,
}

impl CallbackProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> impl FnOnce(i32) + use<> {
        let calls = Arc::clone(&self.calls);
        let codes = Arc::clone(&self.codes);
        move |code| {
            calls.fetch_add(1, Ordering::SeqCst);
            codes.lock().unwrap().push(code);
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn codes(&self) -> Vec<i32> {
        self.codes.lock().unwrap().clone()
    }
}
