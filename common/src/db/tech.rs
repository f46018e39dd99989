use crate::db::indices::{NdrId, ViaDefId};
use crate::geom::point::Coord;
use crate::geom::rect::Rect;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerDirection {
    Vertical,
    Horizontal,
}

/// Parallel-run-length spacing table. Rows are keyed by wire width, columns
/// by parallel run length; a lookup takes the last threshold strictly below
/// the query value.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpacingTable {
    pub widths: Vec<Coord>,
    pub prls: Vec<Coord>,
    pub values: Vec<Vec<Coord>>,
}

impl SpacingTable {
    pub fn uniform(spacing: Coord) -> Self {
        Self {
            widths: vec![0],
            prls: vec![0],
            values: vec![vec![spacing]],
        }
    }

    pub fn find(&self, width1: Coord, width2: Coord, prl: Coord) -> Coord {
        let w = width1.max(width2);
        let row = self.widths.iter().rposition(|&t| w > t).unwrap_or(0);
        let col = self.prls.iter().rposition(|&t| prl > t).unwrap_or(0);
        self.values
            .get(row)
            .and_then(|r| r.get(col))
            .copied()
            .unwrap_or(0)
    }

    pub fn min_value(&self) -> Coord {
        self.values
            .first()
            .and_then(|r| r.first())
            .copied()
            .unwrap_or(0)
    }

    pub fn max_value(&self) -> Coord {
        self.values
            .iter()
            .flat_map(|r| r.iter())
            .copied()
            .max()
            .unwrap_or(0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EolRule {
    pub space: Coord,
    pub width: Coord,
    pub within: Coord,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinCutRule {
    /// Shapes at least this wide need `num_cuts` cuts in any via landing on them.
    pub width: Coord,
    pub num_cuts: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutingLayer {
    pub name: String,
    pub direction: LayerDirection,
    pub pitch: Coord,
    pub width: Coord,
    pub min_area: i64,
    pub spacing: SpacingTable,
    pub eol: Option<EolRule>,
    pub corner_spacing: Option<Coord>,
    pub min_cut: Option<MinCutRule>,
    pub via_forbidden_through: bool,
}

impl RoutingLayer {
    pub fn is_horizontal(&self) -> bool {
        self.direction == LayerDirection::Horizontal
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CutSpacingRule {
    Edge {
        spacing: Coord,
    },
    CenterToCenter {
        spacing: Coord,
    },
    /// Uses `prl_spacing` when the two cuts' projections overlap.
    Table {
        spacing: Coord,
        prl_spacing: Coord,
        center_to_center: bool,
    },
}

impl CutSpacingRule {
    pub fn max_value(&self) -> Coord {
        match *self {
            CutSpacingRule::Edge { spacing } | CutSpacingRule::CenterToCenter { spacing } => {
                spacing
            }
            CutSpacingRule::Table {
                spacing,
                prl_spacing,
                ..
            } => spacing.max(prl_spacing),
        }
    }

    /// `edge_d2` is the squared edge distance, `c2c_d2` the squared center
    /// distance, `has_prl` whether the cut projections overlap.
    pub fn is_violated(&self, edge_d2: i64, c2c_d2: i64, has_prl: bool) -> bool {
        match *self {
            CutSpacingRule::Edge { spacing } => edge_d2 < spacing * spacing,
            CutSpacingRule::CenterToCenter { spacing } => c2c_d2 < spacing * spacing,
            CutSpacingRule::Table {
                spacing,
                prl_spacing,
                center_to_center,
            } => {
                let req = if has_prl { prl_spacing } else { spacing };
                let d2 = if center_to_center { c2c_d2 } else { edge_d2 };
                d2 < req * req
            }
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CutLayer {
    pub name: String,
    pub spacing: Vec<CutSpacingRule>,
    /// Spacing to cuts on the cut layer above.
    pub inter_layer_spacing: Option<Coord>,
    pub max_spacing: Option<Coord>,
}

impl CutLayer {
    pub fn max_cut_spacing(&self) -> Coord {
        self.spacing.iter().map(|r| r.max_value()).max().unwrap_or(0)
    }
}

/// Via geometry relative to its origin. `cut_z` is the lower routing layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ViaDef {
    pub name: String,
    pub cut_z: u8,
    pub bottom: Rect,
    pub cut: Rect,
    pub top: Rect,
    pub num_cuts: u32,
    pub is_default: bool,
}

impl ViaDef {
    pub fn bottom_z(&self) -> u8 {
        self.cut_z
    }
    pub fn top_z(&self) -> u8 {
        self.cut_z + 1
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NonDefaultRule {
    pub name: String,
    pub widths: Vec<Coord>,
    pub spacings: Vec<Coord>,
    pub vias: Vec<Option<ViaDefId>>,
}

impl NonDefaultRule {
    pub fn width(&self, z: u8) -> Option<Coord> {
        self.widths.get(z as usize).copied().filter(|&w| w > 0)
    }
    pub fn spacing(&self, z: u8) -> Coord {
        self.spacings.get(z as usize).copied().unwrap_or(0)
    }
    pub fn via(&self, cut_z: u8) -> Option<ViaDefId> {
        self.vias.get(cut_z as usize).copied().flatten()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Tech {
    pub routing_layers: Vec<RoutingLayer>,
    pub cut_layers: Vec<CutLayer>,
    pub vias: Vec<ViaDef>,
    pub ndrs: Vec<NonDefaultRule>,
    pub manufacturing_grid: Coord,
}

impl Tech {
    pub fn num_layers(&self) -> usize {
        self.routing_layers.len()
    }

    pub fn layer(&self, z: u8) -> &RoutingLayer {
        &self.routing_layers[z as usize]
    }

    pub fn cut(&self, cut_z: u8) -> Option<&CutLayer> {
        self.cut_layers.get(cut_z as usize)
    }

    pub fn via(&self, id: ViaDefId) -> &ViaDef {
        &self.vias[id.index()]
    }

    pub fn ndr(&self, id: NdrId) -> &NonDefaultRule {
        &self.ndrs[id.index()]
    }

    pub fn default_via_id(&self, cut_z: u8) -> Option<ViaDefId> {
        self.vias
            .iter()
            .position(|v| v.cut_z == cut_z && v.is_default)
            .or_else(|| self.vias.iter().position(|v| v.cut_z == cut_z))
            .map(ViaDefId::new)
    }

    pub fn default_via(&self, cut_z: u8) -> Option<&ViaDef> {
        self.default_via_id(cut_z).map(|id| self.via(id))
    }

    /// Multi-cut alternative for `cut_z`, used when a min-cut rule applies.
    pub fn multi_cut_via_id(&self, cut_z: u8, min_cuts: u32) -> Option<ViaDefId> {
        self.vias
            .iter()
            .position(|v| v.cut_z == cut_z && v.num_cuts >= min_cuts)
            .map(ViaDefId::new)
    }

    pub fn has_max_spacing(&self) -> bool {
        self.cut_layers.iter().any(|c| c.max_spacing.is_some())
    }

    pub fn add_via(&mut self, via: ViaDef) -> ViaDefId {
        self.vias.push(via);
        ViaDefId::new(self.vias.len() - 1)
    }

    /// A uniform stack of `num_layers` routing layers with alternating
    /// directions (M1 horizontal), one square single-cut default via per cut
    /// layer and a two-cut bar via as alternative.
    pub fn standard(num_layers: usize, pitch: Coord, width: Coord, spacing: Coord) -> Self {
        let half = width / 2;
        let cut_half = (width * 3) / 10;
        let mut tech = Tech {
            manufacturing_grid: 5,
            ..Default::default()
        };
        for z in 0..num_layers {
            tech.routing_layers.push(RoutingLayer {
                name: format!("M{}", z + 1),
                direction: if z % 2 == 0 {
                    LayerDirection::Horizontal
                } else {
                    LayerDirection::Vertical
                },
                pitch,
                width,
                min_area: width * pitch,
                spacing: SpacingTable::uniform(spacing),
                eol: None,
                corner_spacing: None,
                min_cut: None,
                via_forbidden_through: false,
            });
        }
        for z in 0..num_layers.saturating_sub(1) {
            tech.cut_layers.push(CutLayer {
                name: format!("V{}", z + 1),
                spacing: vec![CutSpacingRule::Edge { spacing }],
                inter_layer_spacing: None,
                max_spacing: None,
            });
            let pad = Rect::from_coords(-half, -half, half, half);
            tech.add_via(ViaDef {
                name: format!("VIA{}{}", z + 1, z + 2),
                cut_z: z as u8,
                bottom: pad,
                cut: Rect::from_coords(-cut_half, -cut_half, cut_half, cut_half),
                top: pad,
                num_cuts: 1,
                is_default: true,
            });
            tech.add_via(ViaDef {
                name: format!("VIA{}{}_2CUT", z + 1, z + 2),
                cut_z: z as u8,
                bottom: Rect::from_coords(-half - pitch / 2, -half, half + pitch / 2, half),
                cut: Rect::from_coords(-cut_half - pitch / 2, -cut_half, cut_half + pitch / 2, cut_half),
                top: Rect::from_coords(-half - pitch / 2, -half, half + pitch / 2, half),
                num_cuts: 2,
                is_default: false,
            });
        }
        tech
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn table() -> SpacingTable {
        SpacingTable {
            widths: vec![0, 100, 300],
            prls: vec![0, 200, 500],
            values: vec![vec![50, 60, 70], vec![80, 90, 100], vec![120, 150, 200]],
        }
    }

    #[rstest]
    #[case(50, 50, 0, 50)]
    #[case(50, 50, 300, 60)]
    #[case(150, 40, 0, 80)]
    #[case(400, 40, 600, 200)]
    fn spacing_table_lookup(#[case] w1: Coord, #[case] w2: Coord, #[case] prl: Coord, #[case] want: Coord) {
        assert_eq!(table().find(w1, w2, prl), want);
    }

    #[test]
    fn table_cut_rule_switches_on_prl() {
        let rule = CutSpacingRule::Table {
            spacing: 10,
            prl_spacing: 20,
            center_to_center: false,
        };
        assert!(!rule.is_violated(15 * 15, 0, false));
        assert!(rule.is_violated(15 * 15, 0, true));
    }

    #[test]
    fn standard_stack_has_default_via_per_cut() {
        let tech = Tech::standard(4, 200, 100, 100);
        assert_eq!(tech.cut_layers.len(), 3);
        for z in 0..3 {
            let via = tech.default_via(z).expect("default via");
            assert_eq!(via.num_cuts, 1);
            assert_eq!(via.cut_z, z);
        }
        assert!(tech.multi_cut_via_id(1, 2).is_some());
    }
}
