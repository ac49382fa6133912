#[cfg(test)]
pub(crate) fn with_temp_home<F, R>(func: F) -> R
where
    F: FnOnce(&std::path::Path) -> R,
{
    static HOME_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
    let _guard = HOME_MUTEX.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let dir = tempfile::tempdir().expect("tempdir");
    let old_home = std::env::var("HOME").ok();
    // SAFETY: HOME is only touched by tests, which hold HOME_MUTEX.
    unsafe { std::env::set_var("HOME", dir.path()) };
    let result = func(dir.path());
    match old_home {
        Some(old) => unsafe { std::env::set_var("HOME", old) },
        None => unsafe { std::env::remove_var("HOME") },
    }
    result
}

#[cfg(test)]
pub(crate) use stub::StubProvider;

#[cfg(test)]
mod stub {
    use anyhow::anyhow;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    use crate::image_source::InlineImage;
    use crate::providers::{Provider, ProviderFuture, ProviderResponse};
    use crate::translations::ResponseSchema;

    #[derive(Default)]
    struct StubState {
        replies: Mutex<VecDeque<Result<String, String>>>,
        calls: AtomicUsize,
        last_user_input: Mutex<Option<String>>,
    }

    /// Provider double with scripted replies. The last reply repeats.
    #[derive(Clone)]
    pub(crate) struct StubProvider {
        state: Arc<StubState>,
        gate: Option<Arc<Semaphore>>,
        delay: Option<Duration>,
        user_input: Option<String>,
    }

    impl StubProvider {
        pub(crate) fn replying(text: &str) -> Self {
            Self::scripted(vec![Ok(text.to_string())])
        }

        pub(crate) fn failing(message: &str) -> Self {
            Self::scripted(vec![Err(message.to_string())])
        }

        pub(crate) fn scripted(replies: Vec<Result<String, String>>) -> Self {
            let state = StubState {
                replies: Mutex::new(replies.into_iter().collect()),
                ..StubState::default()
            };
            Self {
                state: Arc::new(state),
                gate: None,
                delay: None,
                user_input: None,
            }
        }

        pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        /// Holds every call until `release` is invoked.
        pub(crate) fn gated(mut self) -> Self {
            self.gate = Some(Arc::new(Semaphore::new(0)));
            self
        }

        pub(crate) fn release(&self, calls: usize) {
            if let Some(gate) = &self.gate {
                gate.add_permits(calls);
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.state.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn last_user_input(&self) -> Option<String> {
            self.state.last_user_input.lock().expect("stub lock").clone()
        }

        fn next_reply(&self) -> Result<String, String> {
            let mut replies = self.state.replies.lock().expect("stub lock");
            if replies.len() > 1 {
                replies.pop_front().expect("reply")
            } else {
                replies
                    .front()
                    .cloned()
                    .unwrap_or_else(|| Err("no scripted reply".to_string()))
            }
        }
    }

    impl Provider for StubProvider {
        fn append_system_input(self, _input: String) -> Self {
            self
        }

        fn append_user_input(mut self, input: String) -> Self {
            self.user_input = Some(input);
            self
        }

        fn append_user_image(self, _image: InlineImage) -> Self {
            self
        }

        fn with_response_schema(self, _schema: ResponseSchema) -> Self {
            self
        }

        fn generate(self) -> ProviderFuture {
            Box::pin(async move {
                self.state.calls.fetch_add(1, Ordering::SeqCst);
                *self.state.last_user_input.lock().expect("stub lock") = self.user_input.clone();
                if let Some(gate) = &self.gate {
                    gate.acquire().await.expect("gate").forget();
                }
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                match self.next_reply() {
                    Ok(text) => Ok(ProviderResponse {
                        text,
                        model: Some("stub".to_string()),
                        usage: None,
                    }),
                    Err(message) => Err(anyhow!(message)),
                }
            })
        }
    }
}
