pub mod commands;
pub mod editor;
pub mod models;
pub mod save_worker;

pub use editor::EditorSession;
pub use models::SendProgress;
pub use save_worker::SaveQueue;
