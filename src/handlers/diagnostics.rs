use axum::{extract::State, http::StatusCode, Json};
use std::sync::{Mutex, OnceLock};
use sysinfo::System;
use tracing::info;

use crate::models::{DiagnosticsResponse, ErrorResponse};
use crate::store::RoomHub;

static SYSTEM_MONITOR: OnceLock<Mutex<System>> = OnceLock::new();

/// Room and process statistics
pub async fn diagnostics(
    State(hub): State<RoomHub>,
) -> Result<(StatusCode, Json<DiagnosticsResponse>), (StatusCode, Json<ErrorResponse>)> {
    let n_rooms = hub.room_count() as u32;
    let n_conn = hub.connection_count() as u32;
    let n_participants = hub.participant_count() as u32;
    let n_retained_rooms = hub.retained_count() as u32;

    let sys_lock = SYSTEM_MONITOR.get_or_init(|| Mutex::new(System::new_all()));
    let (cpu_usage, memory_alloc, memory_free, memory_total) = match sys_lock.lock() {
        Ok(mut sys) => {
            sys.refresh_cpu();
            sys.refresh_memory();
            (
                sys.global_cpu_info().cpu_usage(),
                sys.used_memory(),
                sys.free_memory(),
                sys.total_memory(),
            )
        }
        Err(_) => {
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    code: 500,
                    status: "error".to_string(),
                    error: "System monitor unavailable".to_string(),
                }),
            ))
        }
    };

    info!(
        "Diagnostics: CPU: {:.2}%, Mem: {}/{} MB, Conn: {}, Rooms: {} (+{} retained)",
        cpu_usage,
        memory_alloc / 1024 / 1024,
        memory_total / 1024 / 1024,
        n_conn,
        n_rooms,
        n_retained_rooms
    );

    Ok((
        StatusCode::OK,
        Json(DiagnosticsResponse {
            n_conn,
            n_rooms,
            n_retained_rooms,
            n_participants,
            cpu_usage,
            memory_alloc,
            memory_total,
            memory_free,
        }),
    ))
}
