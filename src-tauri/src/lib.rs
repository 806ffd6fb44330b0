mod bitmap;
mod error;
mod import;
mod pattern;
mod quantize;
mod serial;
mod session;
mod state_codec;
mod threads;

use rfd::FileDialog;
use serde::Deserialize;
use serial::{LinkStatus, PlatformConnector, SerialTransport};
use session::commands::{
    assign_thread, configure_session, export_pattern_png, get_editor_state, get_pattern_message,
    get_thread_catalog, import_image_bytes, import_image_file, load_pattern_message, load_settings,
    paint_cell, persist_due_save, pick_thread_at, read_settings, resize_canvas, restore_state,
    select_slot, write_atomic, SessionState,
};
use session::{SaveQueue, SendProgress};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tauri::{Emitter, Manager};

/// The one serial link to the machine
pub struct SerialState(pub SerialTransport<PlatformConnector>);

#[derive(Deserialize)]
struct DialogFilter {
    name: String,
    extensions: Vec<String>,
}

#[tauri::command]
fn desktop_select_save_path(
    default_name: String,
    title: Option<String>,
    filters: Vec<DialogFilter>,
) -> Option<String> {
    let mut dialog = FileDialog::new().set_file_name(&default_name);
    if let Some(title) = title {
        dialog = dialog.set_title(&title);
    }

    for filter in filters {
        let extensions: Vec<&str> = filter.extensions.iter().map(String::as_str).collect();
        dialog = dialog.add_filter(&filter.name, &extensions);
    }

    dialog
        .save_file()
        .map(|path| path.to_string_lossy().to_string())
}

#[tauri::command]
fn desktop_select_open_path(title: Option<String>, filters: Vec<DialogFilter>) -> Option<String> {
    let mut dialog = FileDialog::new();
    if let Some(title) = title {
        dialog = dialog.set_title(&title);
    }

    for filter in filters {
        let extensions: Vec<&str> = filter.extensions.iter().map(String::as_str).collect();
        dialog = dialog.add_filter(&filter.name, &extensions);
    }

    dialog
        .pick_file()
        .map(|path| path.to_string_lossy().to_string())
}

#[tauri::command]
fn desktop_write_file(path: String, contents: Vec<u8>) -> Result<(), String> {
    write_atomic(Path::new(&path), &contents)
}

#[tauri::command]
fn desktop_read_file(path: String) -> Result<Vec<u8>, String> {
    fs::read(path).map_err(|err| err.to_string())
}

#[tauri::command]
fn desktop_open_in_folder(path: String) -> Result<(), String> {
    let path_buf = PathBuf::from(path);
    let target = if path_buf.is_dir() {
        path_buf
    } else {
        path_buf.parent().map(Path::to_path_buf).unwrap_or(path_buf)
    };

    opener::open(target).map_err(|err| err.to_string())
}

#[tauri::command]
fn list_serial_ports(serial: tauri::State<'_, SerialState>) -> Vec<String> {
    serial.0.available_ports()
}

#[tauri::command]
fn serial_status(serial: tauri::State<'_, SerialState>) -> LinkStatus {
    serial.0.status()
}

#[tauri::command]
async fn connect_serial(app: tauri::AppHandle, port: String) -> Result<LinkStatus, String> {
    tauri::async_runtime::spawn_blocking(move || {
        let serial = app.state::<SerialState>();
        serial.0.open(&port).map_err(|err| err.to_string())?;
        Ok(serial.0.status())
    })
    .await
    .map_err(|e| format!("Serial connect task failed: {}", e))?
}

fn current_message(app: &tauri::AppHandle) -> Result<Vec<u8>, String> {
    let state = app.state::<SessionState>();
    let guard = state
        .0
        .lock()
        .map_err(|_| "Session lock poisoned".to_string())?;
    let session = guard
        .as_ref()
        .ok_or_else(|| "Session not configured".to_string())?;
    Ok(session.pattern_message())
}

/// Send the current canvas to the machine.
///
/// The message is built under the session lock, then streamed on a blocking
/// worker. `send-progress` events report bytes written so far.
#[tauri::command]
async fn send_pattern(app: tauri::AppHandle) -> Result<usize, String> {
    let message = current_message(&app)?;

    tauri::async_runtime::spawn_blocking(move || {
        let start_time = std::time::Instant::now();
        let serial = app.state::<SerialState>();
        let sent = serial
            .0
            .send_with_progress(&message, |sent, total| {
                if let Err(err) = app.emit("send-progress", SendProgress { sent, total }) {
                    log::debug!("Could not emit send-progress: {}", err);
                }
            })
            .map_err(|err| err.to_string())?;

        log::info!(
            "Pattern sent: {} bytes in {}ms",
            sent,
            start_time.elapsed().as_millis()
        );
        Ok(sent)
    })
    .await
    .map_err(|e| format!("Pattern send task failed: {}", e))?
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    tauri::Builder::default()
        .manage(SessionState(Mutex::new(None)))
        .invoke_handler(tauri::generate_handler![
            desktop_select_save_path,
            desktop_select_open_path,
            desktop_read_file,
            desktop_write_file,
            desktop_open_in_folder,
            list_serial_ports,
            serial_status,
            connect_serial,
            send_pattern,
            load_settings,
            configure_session,
            get_editor_state,
            get_thread_catalog,
            get_pattern_message,
            paint_cell,
            select_slot,
            assign_thread,
            pick_thread_at,
            resize_canvas,
            import_image_bytes,
            import_image_file,
            restore_state,
            load_pattern_message,
            export_pattern_png,
        ])
        .setup(|app| {
            if cfg!(debug_assertions) {
                app.handle().plugin(
                    tauri_plugin_log::Builder::default()
                        .level(log::LevelFilter::Info)
                        .build(),
                )?;
            }

            let saver = app.handle().clone();
            app.manage(SaveQueue::start(move |ticket| {
                persist_due_save(&saver, ticket)
            })?);

            let settings = read_settings(app.handle()).unwrap_or_else(|err| {
                log::warn!("Ignoring stored settings: {}", err);
                None
            });
            let mut transport = SerialTransport::new(PlatformConnector::default());
            if let Some(config) = &settings {
                transport = transport.with_chunk_size(config.chunk_size);
            }
            app.manage(SerialState(transport));

            if let Some(config) = settings {
                let state = app.state::<SessionState>();
                let mut guard = state
                    .0
                    .lock()
                    .map_err(|_| "Session lock poisoned".to_string())?;
                *guard = Some(session::EditorSession::new(config));
            }

            let handle = app.handle().clone();
            tauri::async_runtime::spawn_blocking(move || {
                let preferred = read_settings(&handle)
                    .ok()
                    .flatten()
                    .and_then(|config| config.preferred_port);
                let serial = handle.state::<SerialState>();
                match serial.0.auto_reconnect(preferred.as_deref()) {
                    Ok(port) => log::info!("Reconnected to {}", port),
                    Err(err) => log::debug!("No serial port on startup: {}", err),
                }
            });
            Ok(())
        })
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
