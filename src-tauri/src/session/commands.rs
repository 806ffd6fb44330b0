use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use tauri::{AppHandle, Emitter, Manager, State};

use super::editor::EditorSession;
use super::models::{EditorSnapshot, SessionConfig};
use super::save_worker::SaveQueue;
use crate::threads::{ThreadCatalog, ThreadColor};
use crate::SerialState;

/// Editor session, absent until the front end has sent a configuration
pub struct SessionState(pub Mutex<Option<EditorSession>>);

fn app_root(app: &AppHandle) -> Result<PathBuf, String> {
    let app_data = app
        .path()
        .app_data_dir()
        .map_err(|err| format!("Failed to resolve app data directory: {err}"))?;
    Ok(app_data.join("Knitpix"))
}

fn settings_path(app: &AppHandle) -> Result<PathBuf, String> {
    Ok(app_root(app)?.join("settings.json"))
}

fn state_path(app: &AppHandle) -> Result<PathBuf, String> {
    Ok(app_root(app)?.join("last_state.txt"))
}

/// Write through a temp file in the same directory, then rename over `path`
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| err.to_string())?;
    }

    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let temp_name = format!(
        ".{}.{}.tmp",
        path.file_name()
            .and_then(|v| v.to_str())
            .unwrap_or("knitpix-write"),
        stamp
    );
    let temp_path = path.with_file_name(temp_name);
    fs::write(&temp_path, contents).map_err(|err| err.to_string())?;

    fs::rename(&temp_path, path).or_else(|rename_err| {
        if path.exists() {
            fs::remove_file(path).map_err(|err| err.to_string())?;
            fs::rename(&temp_path, path).map_err(|err| err.to_string())
        } else {
            Err(rename_err.to_string())
        }
    })
}

/// Stored settings, if any were ever saved
pub fn read_settings(app: &AppHandle) -> Result<Option<SessionConfig>, String> {
    let path = settings_path(app)?;
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|err| err.to_string())?;
    serde_json::from_str::<SessionConfig>(&raw)
        .map(Some)
        .map_err(|err| format!("Could not read settings: {err}"))
}

fn write_settings(app: &AppHandle, config: &SessionConfig) -> Result<(), String> {
    let payload = serde_json::to_string_pretty(config).map_err(|err| err.to_string())?;
    write_atomic(&settings_path(app)?, payload.as_bytes())
}

fn lock_session(state: &SessionState) -> Result<MutexGuard<'_, Option<EditorSession>>, String> {
    state
        .0
        .lock()
        .map_err(|_| "Session lock poisoned".to_string())
}

/// Run `f` against the configured session
fn with_session<T>(
    state: &SessionState,
    f: impl FnOnce(&mut EditorSession) -> Result<T, String>,
) -> Result<T, String> {
    let mut guard = lock_session(state)?;
    let session = guard
        .as_mut()
        .ok_or_else(|| "Session not configured".to_string())?;
    f(session)
}

/// Apply an edit, queue a debounced save and return the new view
fn edit(
    app: &AppHandle,
    state: &SessionState,
    f: impl FnOnce(&mut EditorSession) -> Result<bool, String>,
) -> Result<EditorSnapshot, String> {
    let (ticket, delay, snapshot) = with_session(state, |session| {
        let ticket = if f(session)? {
            Some(session.schedule_save())
        } else {
            None
        };
        Ok((ticket, session.save_delay(), session.snapshot()))
    })?;
    if let Some(ticket) = ticket {
        app.state::<SaveQueue>().request(ticket, delay);
    }
    Ok(snapshot)
}

/// Write the state for `ticket` unless a newer edit superseded it.
///
/// Runs on the save worker thread.
pub fn persist_due_save(app: &AppHandle, ticket: u64) {
    let state = app.state::<SessionState>();
    let token = match with_session(&state, |session| Ok(session.take_due_save(ticket))) {
        Ok(Some(token)) => token,
        Ok(None) => return,
        Err(err) => {
            log::warn!("Skipping save: {}", err);
            return;
        }
    };

    let fragment = format!("#{token}");
    if let Err(err) = state_path(app).and_then(|path| write_atomic(&path, fragment.as_bytes())) {
        log::warn!("Could not persist editor state: {}", err);
    }
    if let Err(err) = app.emit("state-saved", fragment) {
        log::warn!("Could not emit state-saved: {}", err);
    }
}

#[tauri::command]
pub fn load_settings(app: AppHandle) -> Result<Option<SessionConfig>, String> {
    read_settings(&app)
}

/// Store the configuration and start (or reconfigure) the session.
#[tauri::command]
pub fn configure_session(
    app: AppHandle,
    config: SessionConfig,
    state: State<'_, SessionState>,
    serial: State<'_, SerialState>,
) -> Result<EditorSnapshot, String> {
    write_settings(&app, &config)?;
    serial.0.set_chunk_size(config.chunk_size);
    log::info!(
        "Session configured: padding={:?}, chunk size {}, import {:?}",
        config.padding,
        config.chunk_size,
        config.import_palette
    );

    let mut guard = lock_session(&state)?;
    match guard.as_mut() {
        Some(session) => session.set_config(config),
        None => *guard = Some(EditorSession::new(config)),
    }
    guard
        .as_ref()
        .map(EditorSession::snapshot)
        .ok_or_else(|| "Session not configured".to_string())
}

#[tauri::command]
pub fn get_editor_state(state: State<'_, SessionState>) -> Result<EditorSnapshot, String> {
    with_session(&state, |session| Ok(session.snapshot()))
}

#[tauri::command]
pub fn get_thread_catalog() -> Vec<ThreadColor> {
    ThreadCatalog::global().threads().to_vec()
}

#[tauri::command]
pub fn paint_cell(
    app: AppHandle,
    x: u32,
    y: u32,
    state: State<'_, SessionState>,
) -> Result<EditorSnapshot, String> {
    edit(&app, &state, |session| Ok(session.paint(x, y)))
}

#[tauri::command]
pub fn select_slot(slot: usize, state: State<'_, SessionState>) -> Result<EditorSnapshot, String> {
    with_session(&state, |session| {
        session.select_slot(slot);
        Ok(session.snapshot())
    })
}

#[tauri::command]
pub fn assign_thread(
    app: AppHandle,
    catalog_index: usize,
    state: State<'_, SessionState>,
) -> Result<EditorSnapshot, String> {
    edit(&app, &state, |session| Ok(session.assign_thread(catalog_index)))
}

#[tauri::command]
pub fn pick_thread_at(
    app: AppHandle,
    x: u32,
    y: u32,
    state: State<'_, SessionState>,
) -> Result<EditorSnapshot, String> {
    edit(&app, &state, |session| Ok(session.pick_thread_at(x, y)))
}

#[tauri::command]
pub fn resize_canvas(
    app: AppHandle,
    size_index: usize,
    state: State<'_, SessionState>,
) -> Result<EditorSnapshot, String> {
    edit(&app, &state, |session| Ok(session.resize_canvas(size_index)))
}

#[tauri::command]
pub fn import_image_bytes(
    app: AppHandle,
    image_bytes: Vec<u8>,
    state: State<'_, SessionState>,
) -> Result<EditorSnapshot, String> {
    edit(&app, &state, |session| {
        session
            .import_image(&image_bytes)
            .map_err(|err| err.to_string())?;
        Ok(true)
    })
}

#[tauri::command]
pub fn import_image_file(
    app: AppHandle,
    file_path: String,
    state: State<'_, SessionState>,
) -> Result<EditorSnapshot, String> {
    log::info!("Importing image from file: {}", file_path);
    let bytes = fs::read(&file_path).map_err(|err| err.to_string())?;
    import_image_bytes(app, bytes, state)
}

/// Restore from a state token, or from the last persisted one when none is given.
#[tauri::command]
pub fn restore_state(
    app: AppHandle,
    token: Option<String>,
    state: State<'_, SessionState>,
) -> Result<EditorSnapshot, String> {
    let token = match token {
        Some(token) => Some(token),
        None => state_path(&app)
            .ok()
            .and_then(|path| fs::read_to_string(path).ok()),
    };
    with_session(&state, |session| {
        session.restore(token.as_deref());
        Ok(session.snapshot())
    })
}

/// Replace the canvas with a wire message, e.g. one saved from an earlier send
#[tauri::command]
pub fn load_pattern_message(
    app: AppHandle,
    message: String,
    state: State<'_, SessionState>,
) -> Result<EditorSnapshot, String> {
    edit(&app, &state, |session| {
        session
            .load_pattern_message(message.as_bytes())
            .map_err(|err| err.to_string())?;
        Ok(true)
    })
}

/// Indexed PNG of the current canvas
#[tauri::command]
pub fn export_pattern_png(state: State<'_, SessionState>) -> Result<Vec<u8>, String> {
    with_session(&state, |session| {
        session.export_png().map_err(|err| err.to_string())
    })
}

/// Wire message for the current canvas, as it would be sent
#[tauri::command]
pub fn get_pattern_message(state: State<'_, SessionState>) -> Result<String, String> {
    with_session(&state, |session| {
        Ok(String::from_utf8_lossy(&session.pattern_message()).to_string())
    })
}
