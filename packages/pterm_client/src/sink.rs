use async_trait::async_trait;

use crate::protocol::TabKey;

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub cols: u16,
    pub rows: u16,
}

impl Geometry {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    pub fn is_valid(&self) -> bool {
        self.cols > 0 && self.rows > 0
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// Where decoded output for one tab ends up (a terminal widget, stdout, ...).
///
/// The client never has more than one `write` outstanding per sink.
#[async_trait]
pub trait RenderSink: Send + Sync {
    async fn write(&self, bytes: Vec<u8>);

    fn set_visible(&self, visible: bool);

    /// Current size, or `None` if the sink cannot be measured yet.
    fn measure(&self) -> Option<Geometry>;

    /// The tab is gone; drop any resources.
    fn release(&self) {}
}

/// Creates a sink for a newly opened tab.
pub trait SinkFactory: Send + Sync {
    fn create(&self, key: TabKey) -> std::sync::Arc<dyn RenderSink>;
}
