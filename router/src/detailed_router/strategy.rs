use eda_common::util::config::DetailedRoutingConfig;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RipupMode {
    /// Reroute every net in the tile.
    All,
    /// Reroute the owners of violations.
    Drc,
    /// Reroute nets with geometry near violations.
    NearDrc,
    /// Route only nets that have no initial routing.
    Incr,
    /// Try alternative via definitions under violations.
    ViaSwap,
}

impl RipupMode {
    pub fn name(&self) -> &'static str {
        match self {
            RipupMode::All => "ALL",
            RipupMode::Drc => "DRC",
            RipupMode::NearDrc => "NEARDRC",
            RipupMode::Incr => "INCR",
            RipupMode::ViaSwap => "VIASWAP",
        }
    }

    /// Modes whose work is driven by existing markers.
    pub fn is_marker_driven(&self) -> bool {
        matches!(self, RipupMode::Drc | RipupMode::NearDrc | RipupMode::ViaSwap)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowState {
    Guides,
    Stubborn,
    Optimization,
    Skip,
}

/// Tuning of one search-and-repair iteration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchRepairArgs {
    /// Tile edge in gcells.
    pub size: u32,
    /// Tile origin shift in gcells, never positive.
    pub offset: i32,
    /// Reroute budget of one net inside one worker.
    pub maze_end_iter: u32,
    pub drc_cost: u32,
    pub marker_cost: u32,
    pub fixed_cost: u32,
    pub marker_decay: f32,
    pub ripup_mode: RipupMode,
    pub follow_guide: bool,
}

impl SearchRepairArgs {
    pub fn with_costs(&self, mult: u32) -> Self {
        Self {
            drc_cost: self.drc_cost * mult,
            marker_cost: self.marker_cost * mult,
            fixed_cost: self.fixed_cost * mult,
            ..*self
        }
    }
}

/// Multipliers of the route-shape cost (`sc`) and marker cost (`mc`) units.
#[derive(Clone, Copy)]
enum Unit {
    Sc(u32),
    Mc(u32),
    Zero,
}

type Row = (u32, i32, u32, Unit, Unit, Unit, f32, RipupMode, bool);

use RipupMode::{All, Drc, NearDrc};
use Unit::{Mc, Sc, Zero};

#[rustfmt::skip]
const TABLE: [Row; 65] = [
    (7,  0,  3, Sc(1),  Zero,   Sc(1),   0.95,  All,     true),
    (7, -2,  3, Sc(1),  Sc(1),  Sc(1),   0.95,  All,     true),
    (7, -5,  3, Sc(1),  Sc(1),  Sc(1),   0.95,  All,     true),
    (7,  0,  8, Sc(1),  Mc(1),  Sc(2),   0.95,  Drc,     false),
    (7, -1,  8, Sc(1),  Mc(1),  Sc(2),   0.95,  Drc,     false),
    (7, -2,  8, Sc(1),  Mc(1),  Sc(2),   0.95,  Drc,     false),
    (7, -3,  8, Sc(1),  Mc(1),  Sc(2),   0.95,  Drc,     false),
    (7, -4,  8, Sc(1),  Mc(1),  Sc(2),   0.95,  Drc,     false),
    (7, -5,  8, Sc(1),  Mc(1),  Sc(2),   0.95,  Drc,     false),
    (7, -6,  8, Sc(1),  Mc(1),  Sc(2),   0.95,  Drc,     false),
    (7,  0,  8, Sc(2),  Mc(1),  Sc(3),   0.95,  Drc,     false),
    (7, -1,  8, Sc(2),  Mc(1),  Sc(3),   0.95,  Drc,     false),
    (7, -2,  8, Sc(2),  Mc(1),  Sc(3),   0.95,  Drc,     false),
    (7, -3,  8, Sc(2),  Mc(1),  Sc(3),   0.95,  Drc,     false),
    (7, -4,  8, Sc(2),  Mc(1),  Sc(3),   0.95,  Drc,     false),
    (7, -5,  8, Sc(2),  Mc(1),  Sc(4),   0.95,  Drc,     false),
    (7, -6,  8, Sc(2),  Mc(1),  Sc(4),   0.95,  Drc,     false),
    (7, -3,  8, Sc(1),  Mc(1),  Sc(4),   0.95,  All,     false),
    (7,  0,  8, Sc(4),  Mc(1),  Sc(4),   0.95,  Drc,     false),
    (7, -1,  8, Sc(4),  Mc(1),  Sc(4),   0.95,  Drc,     false),
    (7, -2,  8, Sc(4),  Mc(1),  Sc(10),  0.95,  Drc,     false),
    (7, -3,  8, Sc(4),  Mc(1),  Sc(10),  0.95,  Drc,     false),
    (7, -4,  8, Sc(4),  Mc(1),  Sc(10),  0.95,  Drc,     false),
    (7, -5,  8, Sc(1),  Mc(1),  Sc(10),  0.95,  NearDrc, false),
    (7, -6,  8, Sc(4),  Mc(1),  Sc(10),  0.95,  Drc,     false),
    (5, -2,  8, Sc(1),  Mc(1),  Sc(10),  0.95,  All,     false),
    (7,  0,  8, Sc(8),  Mc(2),  Sc(10),  0.95,  Drc,     false),
    (7, -1,  8, Sc(8),  Mc(2),  Sc(10),  0.95,  Drc,     false),
    (7, -2,  8, Sc(8),  Mc(2),  Sc(10),  0.95,  Drc,     false),
    (7, -3,  8, Sc(8),  Mc(2),  Sc(10),  0.95,  Drc,     false),
    (7, -4,  8, Sc(1),  Mc(1),  Sc(50),  0.95,  NearDrc, false),
    (7, -5,  8, Sc(8),  Mc(2),  Sc(50),  0.95,  Drc,     false),
    (7, -6,  8, Sc(8),  Mc(2),  Sc(50),  0.95,  Drc,     false),
    (3, -1,  8, Sc(1),  Mc(1),  Sc(50),  0.95,  All,     false),
    (7,  0,  8, Sc(16), Mc(4),  Sc(50),  0.95,  Drc,     false),
    (7, -1,  8, Sc(16), Mc(4),  Sc(50),  0.95,  Drc,     false),
    (7, -2,  8, Sc(16), Mc(4),  Sc(50),  0.95,  Drc,     false),
    (7, -3,  8, Sc(1),  Mc(1),  Sc(50),  0.95,  NearDrc, false),
    (7, -4,  8, Sc(16), Mc(4),  Sc(50),  0.95,  Drc,     false),
    (7, -5,  8, Sc(16), Mc(4),  Sc(50),  0.95,  Drc,     false),
    (7, -6,  8, Sc(16), Mc(4),  Sc(100), 0.99,  Drc,     false),
    (3, -2,  8, Sc(1),  Mc(1),  Sc(100), 0.99,  All,     false),
    (7,  0, 16, Sc(16), Mc(4),  Sc(100), 0.99,  Drc,     false),
    (7, -1, 16, Sc(16), Mc(4),  Sc(100), 0.99,  Drc,     false),
    (7, -2, 16, Sc(1),  Mc(1),  Sc(100), 0.99,  NearDrc, false),
    (7, -3, 16, Sc(16), Mc(4),  Sc(100), 0.99,  Drc,     false),
    (7, -4, 16, Sc(16), Mc(4),  Sc(100), 0.99,  Drc,     false),
    (7, -5, 16, Sc(16), Mc(4),  Sc(100), 0.99,  Drc,     false),
    (7, -6, 16, Sc(16), Mc(4),  Sc(100), 0.99,  Drc,     false),
    (3,  0,  8, Sc(1),  Mc(1),  Sc(100), 0.99,  All,     false),
    (7,  0, 32, Sc(32), Mc(8),  Sc(100), 0.999, Drc,     false),
    (7, -1, 32, Sc(1),  Mc(1),  Sc(100), 0.999, NearDrc, false),
    (7, -2, 32, Sc(32), Mc(8),  Sc(100), 0.999, Drc,     false),
    (7, -3, 32, Sc(32), Mc(8),  Sc(100), 0.999, Drc,     false),
    (7, -4, 32, Sc(32), Mc(8),  Sc(100), 0.999, Drc,     false),
    (7, -5, 32, Sc(32), Mc(8),  Sc(100), 0.999, Drc,     false),
    (7, -6, 32, Sc(32), Mc(8),  Sc(100), 0.999, Drc,     false),
    (3, -1,  8, Sc(1),  Mc(1),  Sc(100), 0.999, All,     false),
    (7,  0, 64, Sc(1),  Mc(1),  Sc(100), 0.999, NearDrc, false),
    (7, -1, 64, Sc(64), Mc(16), Sc(100), 0.999, Drc,     false),
    (7, -2, 64, Sc(64), Mc(16), Sc(100), 0.999, Drc,     false),
    (7, -3, 64, Sc(64), Mc(16), Sc(100), 0.999, Drc,     false),
    (7, -4, 64, Sc(64), Mc(16), Sc(100), 0.999, Drc,     false),
    (7, -5, 64, Sc(64), Mc(16), Sc(100), 0.999, Drc,     false),
    (7, -6, 64, Sc(64), Mc(16), Sc(100), 0.999, Drc,     false),
];

/// The default strategy sequence, scaled by the configured cost units.
pub fn default_strategies(cfg: &DetailedRoutingConfig) -> Vec<SearchRepairArgs> {
    let resolve = |u: Unit| match u {
        Unit::Sc(k) => cfg.route_shape_cost * k,
        Unit::Mc(k) => cfg.marker_cost * k,
        Unit::Zero => 0,
    };
    TABLE
        .iter()
        .map(|&(size, offset, maze_end_iter, drc, marker, fixed, decay, ripup_mode, follow_guide)| SearchRepairArgs {
            size,
            offset,
            maze_end_iter,
            drc_cost: resolve(drc),
            marker_cost: resolve(marker),
            fixed_cost: resolve(fixed),
            marker_decay: decay,
            ripup_mode,
            follow_guide,
        })
        .collect()
}

/// Grows tile sizes after congested iterations and relaxes them otherwise.
#[derive(Debug, Default)]
pub struct ClipSizer {
    inc: f64,
}

impl ClipSizer {
    pub fn adapt(&mut self, args: &mut SearchRepairArgs, congested: bool, max_increase: i32) {
        if args.ripup_mode == RipupMode::All {
            return;
        }
        self.inc = if congested {
            self.inc + 2.0
        } else {
            (self.inc - 0.2).max(0.0)
        };
        let grow = (self.inc.round() as i32).min(max_increase).max(0);
        args.size += grow as u32;
    }
}

/// Whether an ALL row runs as INCR instead. Fixed routing always keeps its
/// geometry; initial routing is only preserved through the first three
/// iterations unless `force` asks for it everywhere.
pub fn all_becomes_incr(iter: usize, has_fixed: bool, has_initial: bool, force: bool) -> bool {
    has_fixed || (has_initial && (force || iter <= 2))
}

/// Flow decision for one iteration.
#[allow(clippy::too_many_arguments)]
pub fn decide_flow(
    iter: usize,
    args: &SearchRepairArgs,
    num_markers: usize,
    incremental_work: bool,
    improved: bool,
    last: FlowState,
    stubborn_trigger: usize,
) -> FlowState {
    match args.ripup_mode {
        RipupMode::Drc | RipupMode::NearDrc | RipupMode::ViaSwap if num_markers == 0 => return FlowState::Skip,
        RipupMode::Incr if !incremental_work => return FlowState::Skip,
        _ => {}
    }
    if iter >= 3 && (1..=stubborn_trigger).contains(&num_markers) && !improved {
        return if last == FlowState::Stubborn {
            FlowState::Guides
        } else {
            FlowState::Stubborn
        };
    }
    FlowState::Optimization
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn table_shape_and_units() {
        let cfg = DetailedRoutingConfig::default();
        let s = default_strategies(&cfg);
        assert_eq!(s.len(), 65);
        assert_eq!(s[0].marker_cost, 0);
        assert!(s[..3].iter().all(|a| a.follow_guide && a.ripup_mode == RipupMode::All));
        assert!(s[3..].iter().all(|a| !a.follow_guide));
        assert_eq!(s[1].marker_cost, cfg.route_shape_cost);
        assert_eq!(s[3].fixed_cost, 2 * cfg.route_shape_cost);
        assert_eq!(s[64].drc_cost, 64 * cfg.route_shape_cost);
        assert_eq!(s[64].marker_cost, 16 * cfg.marker_cost);
        assert!(s.iter().all(|a| a.offset <= 0 && a.size > 0));
    }

    #[test]
    fn clip_size_grows_only_when_congested() {
        let cfg = DetailedRoutingConfig::default();
        let mut sizer = ClipSizer::default();
        let base = default_strategies(&cfg)[3];
        let mut a = base;
        sizer.adapt(&mut a, true, 18);
        assert_eq!(a.size, base.size + 2);
        let mut b = base;
        sizer.adapt(&mut b, false, 18);
        assert_eq!(b.size, base.size + 2);
        let mut all = default_strategies(&cfg)[0];
        sizer.adapt(&mut all, true, 18);
        assert_eq!(all.size, 7);
    }

    #[rstest]
    #[case(0, false, false, false, false)]
    #[case(17, true, false, false, true)]
    #[case(2, false, true, false, true)]
    #[case(17, false, true, false, false)]
    #[case(17, false, true, true, true)]
    fn incremental_conversion(
        #[case] iter: usize,
        #[case] fixed: bool,
        #[case] initial: bool,
        #[case] force: bool,
        #[case] want: bool,
    ) {
        assert_eq!(all_becomes_incr(iter, fixed, initial, force), want);
    }

    #[rstest]
    #[case(5, RipupMode::Drc, 0, false, FlowState::Optimization, FlowState::Skip)]
    #[case(5, RipupMode::Drc, 3, false, FlowState::Optimization, FlowState::Stubborn)]
    #[case(5, RipupMode::Drc, 3, false, FlowState::Stubborn, FlowState::Guides)]
    #[case(5, RipupMode::Drc, 3, true, FlowState::Optimization, FlowState::Optimization)]
    #[case(2, RipupMode::Drc, 3, false, FlowState::Optimization, FlowState::Optimization)]
    #[case(5, RipupMode::Drc, 40, false, FlowState::Optimization, FlowState::Optimization)]
    #[case(0, RipupMode::All, 0, false, FlowState::Optimization, FlowState::Optimization)]
    fn flow_transitions(
        #[case] iter: usize,
        #[case] mode: RipupMode,
        #[case] markers: usize,
        #[case] improved: bool,
        #[case] last: FlowState,
        #[case] want: FlowState,
    ) {
        let mut args = default_strategies(&DetailedRoutingConfig::default())[3];
        args.ripup_mode = mode;
        assert_eq!(decide_flow(iter, &args, markers, false, improved, last, 11), want);
    }
}
