use eda_common::geom::point::Point;
use eda_common::geom::rect::Rect;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouteError {
    /// No path from the connected component of `net` to `pin`. Fatal.
    #[error(
        "net '{net}': no path to pin '{pin}' inside route box {route_box:?}; sources tried: {}",
        format_sources(.sources)
    )]
    SearchFailed {
        net: String,
        pin: String,
        sources: Vec<(Point, u8)>,
        route_box: Rect,
    },

    #[error("{} net(s) failed connectivity: {}", .nets.len(), .nets.join(", "))]
    Connectivity { nets: Vec<String> },

    #[error("malformed geometry: {0}")]
    Geometry(String),

    #[error("worker dispatch failed: {0}")]
    Dispatch(String),

    #[error("serialization: {0}")]
    Serialize(#[from] bincode::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

fn format_sources(sources: &[(Point, u8)]) -> String {
    if sources.is_empty() {
        return "none".to_string();
    }
    sources
        .iter()
        .map(|(p, z)| format!("{}@z{}", p, z))
        .collect::<Vec<_>>()
        .join(" ")
}

pub type Result<T> = std::result::Result<T, RouteError>;
