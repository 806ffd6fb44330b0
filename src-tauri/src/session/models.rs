use crate::import::ImportPaletteMode;
use crate::pattern::FieldPadding;
use crate::serial::transport::DEFAULT_CHUNK_SIZE;
use crate::state_codec::SAVE_DEBOUNCE;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_save_debounce_ms() -> u64 {
    SAVE_DEBOUNCE.as_millis() as u64
}

/// Editor settings supplied by the front end.
///
/// `padding` has no default on purpose: the machine's expected header
/// convention must be chosen explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub padding: FieldPadding,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub import_palette: ImportPaletteMode,
    #[serde(default = "default_save_debounce_ms")]
    pub save_debounce_ms: u64,
    #[serde(default)]
    pub preferred_port: Option<String>,
}

impl SessionConfig {
    pub fn new(padding: FieldPadding) -> Self {
        Self {
            padding,
            chunk_size: default_chunk_size(),
            import_palette: ImportPaletteMode::default(),
            save_debounce_ms: default_save_debounce_ms(),
            preferred_port: None,
        }
    }

    pub fn save_delay(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }
}

/// What the front end needs to redraw the editor
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorSnapshot {
    pub width: u32,
    pub height: u32,
    pub size_index: usize,
    pub canvas_sizes: Vec<u32>,
    pub slots: [usize; 4],
    pub palette: Vec<String>,
    pub selected_slot: usize,
    pub rgba: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendProgress {
    pub sent: usize,
    pub total: usize,
}
