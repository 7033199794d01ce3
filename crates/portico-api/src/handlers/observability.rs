//! Statistics and event-log handlers.

use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::handlers::common::{ok, HandlerResult};
use crate::server::ServerState;

/// Overview statistics payload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsOverviewDto {
    pub total: usize,
    pub enabled: usize,
    pub disabled: usize,
    pub loaded: usize,
    pub by_type: HashMap<String, usize>,
    pub menu_links: usize,
    pub widget_placements: usize,
    pub bus_handlers: usize,
}

/// GET /admin/extensions/stats/overview
pub async fn stats_overview_handler(
    State(state): State<ServerState>,
) -> HandlerResult<StatsOverviewDto> {
    let stats = state.catalog.statistics()?;
    let loaded = state.loader.loaded_ids().await.len();

    ok(StatsOverviewDto {
        total: stats.total,
        enabled: stats.enabled,
        disabled: stats.disabled,
        loaded,
        by_type: stats.by_type,
        menu_links: stats.menu_links,
        widget_placements: stats.widget_placements,
        bus_handlers: state.bus.handler_count(),
    })
}

/// Query parameters for the event log.
#[derive(Debug, Deserialize)]
pub struct EventLogQuery {
    /// Maximum number of rows, newest first.
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// One event-log row.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLogDto {
    pub id: String,
    pub event_name: String,
    pub source: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub handlers_executed: usize,
    pub duration_ms: u64,
    pub created_at: i64,
}

/// GET /admin/extensions/event-logs
pub async fn event_logs_handler(
    State(state): State<ServerState>,
    Query(query): Query<EventLogQuery>,
) -> HandlerResult<Vec<EventLogDto>> {
    let limit = query.limit.min(1000);
    let records = state.event_log.recent(limit)?;

    ok(records
        .into_iter()
        .map(|record| EventLogDto {
            id: record.id,
            event_name: record.event_name,
            source: record.source,
            success: record.success,
            error: record.error,
            handlers_executed: record.handlers_executed,
            duration_ms: record.duration_ms,
            created_at: record.created_at,
        })
        .collect())
}
