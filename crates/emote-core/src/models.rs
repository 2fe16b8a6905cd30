//! Model residency gate.
//!
//! Tracks whether the engine's weights are `Unloaded`, `Loading` or `Loaded`
//! so that concurrent start requests share one load instead of racing.

use std::future::Future;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    Unloaded,
    Loading,
    Loaded,
}

pub struct ModelGate {
    state: watch::Sender<ModelState>,
}

impl Default for ModelGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ModelState::Unloaded);
        Self { state }
    }

    pub fn state(&self) -> ModelState {
        *self.state.borrow()
    }

    /// Run `load` unless the models are already resident.
    ///
    /// Callers arriving while another caller is loading wait for that load.
    /// If it fails the gate drops back to `Unloaded`, and the waiters try
    /// again themselves. The loader's error goes only to the caller that
    /// ran it.
    pub async fn ensure_loaded<F, Fut, E>(&self, load: F) -> Result<(), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        loop {
            let mut rx = self.state.subscribe();

            let claimed = self.state.send_if_modified(|s| {
                if *s == ModelState::Unloaded {
                    *s = ModelState::Loading;
                    true
                } else {
                    false
                }
            });

            if claimed {
                tracing::info!("loading models");
                let guard = ResetOnDrop(&self.state);
                let result = load().await;
                std::mem::forget(guard);
                return match result {
                    Ok(()) => {
                        self.state.send_replace(ModelState::Loaded);
                        tracing::info!("models loaded");
                        Ok(())
                    }
                    Err(e) => {
                        self.state.send_replace(ModelState::Unloaded);
                        Err(e)
                    }
                };
            }

            let current = *rx.borrow_and_update();
            match current {
                ModelState::Loaded => return Ok(()),
                ModelState::Loading => {
                    tracing::debug!("models already loading, waiting");
                    // The sender lives in `self`, so the channel cannot close here.
                    let _ = rx.wait_for(|s| *s != ModelState::Loading).await;
                }
                ModelState::Unloaded => {}
            }
        }
    }
}

/// Puts the gate back to `Unloaded` if a load future is dropped mid-flight.
struct ResetOnDrop<'a>(&'a watch::Sender<ModelState>);

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(ModelState::Unloaded);
    }
}
