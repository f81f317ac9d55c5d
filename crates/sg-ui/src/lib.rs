pub mod renderer;
pub mod paint_sync;
pub mod selection;
pub mod viewer;
pub mod state;
pub mod hex_panel;

pub use hex_panel::HexPanel;
pub use paint_sync::{FetchFailures, LoadingSnapshot, PaintScheduler, RepaintRequester, StateSync};
pub use renderer::{Canvas, GridLayout, Highlights, PaintStats, Theme, ViewportRenderer};
pub use selection::{AutoScroll, SelectionModel, SelectionState};
pub use state::AppState;
pub use viewer::{PhaseEvent, SearchView, TabViewer, Task, TaskState, ViewerPhase};
