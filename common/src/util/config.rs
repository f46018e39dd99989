use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub detailed_routing: DetailedRoutingConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DetailedRoutingConfig {
    /// Outer loop bound; the strategy table is cut off here.
    #[serde(default = "default_end_iteration")]
    pub end_iteration: usize,
    #[serde(default = "default_route_shape_cost")]
    pub route_shape_cost: u32,
    #[serde(default = "default_marker_cost")]
    pub marker_cost: u32,
    #[serde(default = "default_fixed_shape_cost")]
    pub fixed_shape_cost: u32,
    #[serde(default = "default_marker_decay")]
    pub marker_decay: f32,
    #[serde(default = "default_max_clip_size_increase")]
    pub max_clip_size_increase: i32,
    #[serde(default = "default_mt_safe_dist")]
    pub mt_safe_dist: i64,
    #[serde(default = "default_drc_safe_dist")]
    pub drc_safe_dist: i64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_congestion_threshold")]
    pub congestion_threshold: f64,
    #[serde(default = "default_congestion_iter_begin")]
    pub congestion_iter_begin: usize,
    #[serde(default = "default_congestion_iter_end")]
    pub congestion_iter_end: usize,
    #[serde(default = "default_congestion_min_layer")]
    pub congestion_min_layer: u8,
    #[serde(default = "default_feedthrough_penalty")]
    pub feedthrough_penalty: u32,
    #[serde(default = "default_via_cost")]
    pub via_cost: u32,
    #[serde(default = "default_wrong_way_cost")]
    pub wrong_way_cost: u32,
    #[serde(default = "default_guide_cost")]
    pub guide_cost: u32,
    #[serde(default = "default_max_expansions")]
    pub max_expansions: u32,
    #[serde(default = "default_window_margin")]
    pub window_margin: u32,
    #[serde(default = "default_max_ripup_avoids")]
    pub max_ripup_avoids: u32,
    #[serde(default = "default_stubborn_max_cluster")]
    pub stubborn_max_cluster: u32,
    #[serde(default = "default_stubborn_wavefront_max")]
    pub stubborn_wavefront_max: u32,
    #[serde(default = "default_stubborn_trigger")]
    pub stubborn_trigger: usize,
    #[serde(default)]
    pub threads: usize,
    #[serde(default)]
    pub distributed: bool,
    #[serde(default = "default_remote_workers")]
    pub remote_workers: usize,
    #[serde(default)]
    pub debug_dump_dir: Option<PathBuf>,
    #[serde(default)]
    pub debug_iter: Option<usize>,
    /// Keeps initial routing through every ALL iteration, not only the
    /// first three.
    #[serde(default)]
    pub incremental: bool,
}

impl Default for DetailedRoutingConfig {
    fn default() -> Self {
        Self {
            end_iteration: default_end_iteration(),
            route_shape_cost: default_route_shape_cost(),
            marker_cost: default_marker_cost(),
            fixed_shape_cost: default_fixed_shape_cost(),
            marker_decay: default_marker_decay(),
            max_clip_size_increase: default_max_clip_size_increase(),
            mt_safe_dist: default_mt_safe_dist(),
            drc_safe_dist: default_drc_safe_dist(),
            batch_size: default_batch_size(),
            congestion_threshold: default_congestion_threshold(),
            congestion_iter_begin: default_congestion_iter_begin(),
            congestion_iter_end: default_congestion_iter_end(),
            congestion_min_layer: default_congestion_min_layer(),
            feedthrough_penalty: default_feedthrough_penalty(),
            via_cost: default_via_cost(),
            wrong_way_cost: default_wrong_way_cost(),
            guide_cost: default_guide_cost(),
            max_expansions: default_max_expansions(),
            window_margin: default_window_margin(),
            max_ripup_avoids: default_max_ripup_avoids(),
            stubborn_max_cluster: default_stubborn_max_cluster(),
            stubborn_wavefront_max: default_stubborn_wavefront_max(),
            stubborn_trigger: default_stubborn_trigger(),
            threads: 0,
            distributed: false,
            remote_workers: default_remote_workers(),
            debug_dump_dir: None,
            debug_iter: None,
            incremental: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    #[serde(default = "default_design_file")]
    pub design: String,
    #[serde(default = "default_output_file")]
    pub output: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            design: default_design_file(),
            output: default_output_file(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneratorConfig {
    #[serde(default = "default_gen_gcells")]
    pub gcells: u32,
    #[serde(default = "default_gen_layers")]
    pub layers: usize,
    #[serde(default = "default_gen_pitch")]
    pub pitch: i64,
    #[serde(default = "default_gen_tracks_per_gcell")]
    pub tracks_per_gcell: i64,
    #[serde(default = "default_gen_seed")]
    pub seed: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            gcells: default_gen_gcells(),
            layers: default_gen_layers(),
            pitch: default_gen_pitch(),
            tracks_per_gcell: default_gen_tracks_per_gcell(),
            seed: default_gen_seed(),
        }
    }
}

fn default_end_iteration() -> usize {
    64
}
fn default_route_shape_cost() -> u32 {
    8
}
fn default_marker_cost() -> u32 {
    32
}
fn default_fixed_shape_cost() -> u32 {
    8
}
fn default_marker_decay() -> f32 {
    0.8
}
fn default_max_clip_size_increase() -> i32 {
    18
}
fn default_mt_safe_dist() -> i64 {
    2000
}
fn default_drc_safe_dist() -> i64 {
    500
}
fn default_batch_size() -> usize {
    1024
}
fn default_congestion_threshold() -> f64 {
    0.4
}
fn default_congestion_iter_begin() -> usize {
    7
}
fn default_congestion_iter_end() -> usize {
    30
}
fn default_congestion_min_layer() -> u8 {
    4
}
fn default_feedthrough_penalty() -> u32 {
    5
}
fn default_via_cost() -> u32 {
    4
}
fn default_wrong_way_cost() -> u32 {
    8
}
fn default_guide_cost() -> u32 {
    4
}
fn default_max_expansions() -> u32 {
    2_000_000
}
fn default_window_margin() -> u32 {
    8
}
fn default_max_ripup_avoids() -> u32 {
    2
}
fn default_stubborn_max_cluster() -> u32 {
    4
}
fn default_stubborn_wavefront_max() -> u32 {
    7
}
fn default_stubborn_trigger() -> usize {
    11
}
fn default_remote_workers() -> usize {
    2
}
fn default_design_file() -> String {
    "inputs/design.bin".to_string()
}
fn default_output_file() -> String {
    "output/routed.bin".to_string()
}
fn default_gen_gcells() -> u32 {
    8
}
fn default_gen_layers() -> usize {
    4
}
fn default_gen_pitch() -> i64 {
    200
}
fn default_gen_tracks_per_gcell() -> i64 {
    10
}
fn default_gen_seed() -> u64 {
    42
}
