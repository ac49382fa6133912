use tokio::sync::mpsc;

use crate::engine::Engine;
use crate::providers::Provider;
use crate::viewport::ScrollEvent;

pub struct ServerState<P: Provider> {
    pub(crate) engine: Engine<P>,
    pub(crate) scroll: mpsc::Sender<ScrollEvent>,
}

impl<P: Provider> ServerState<P> {
    /// Starts the engine's scroll loop and keeps the sending half.
    pub fn start(engine: Engine<P>) -> Self {
        let (scroll, _task) = engine.spawn_scroll_loop();
        Self { engine, scroll }
    }
}
