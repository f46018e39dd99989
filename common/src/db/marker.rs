use crate::db::indices::{NetId, PinId};
use crate::geom::rect::Rect;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Owner {
    Net(NetId),
    Pin(PinId),
    Obstruction(u32),
}

impl Owner {
    pub fn net(&self) -> Option<NetId> {
        match self {
            Owner::Net(n) => Some(*n),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RuleKind {
    Short,
    MetalSpacing,
    EolSpacing,
    CornerSpacing,
    CutSpacing,
    InterLayerCutSpacing,
    MinArea,
    MaxSpacing,
    Connectivity,
}

impl RuleKind {
    pub const ALL: [RuleKind; 9] = [
        RuleKind::Short,
        RuleKind::MetalSpacing,
        RuleKind::EolSpacing,
        RuleKind::CornerSpacing,
        RuleKind::CutSpacing,
        RuleKind::InterLayerCutSpacing,
        RuleKind::MinArea,
        RuleKind::MaxSpacing,
        RuleKind::Connectivity,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RuleKind::Short => "Short",
            RuleKind::MetalSpacing => "MetSpc",
            RuleKind::EolSpacing => "EOL",
            RuleKind::CornerSpacing => "CornerSpc",
            RuleKind::CutSpacing => "CutSpc",
            RuleKind::InterLayerCutSpacing => "InterCutSpc",
            RuleKind::MinArea => "MinArea",
            RuleKind::MaxSpacing => "MaxSpc",
            RuleKind::Connectivity => "Conn",
        }
    }
}

/// A design-rule violation. `layer` indexes routing layers, or cut layers
/// when `on_cut` is set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub bbox: Rect,
    pub layer: u8,
    pub on_cut: bool,
    pub rule: RuleKind,
    pub victims: Vec<Owner>,
    pub aggressors: Vec<Owner>,
}

impl Marker {
    pub fn new(rule: RuleKind, layer: u8, bbox: Rect) -> Self {
        Self {
            bbox,
            layer,
            on_cut: false,
            rule,
            victims: Vec::new(),
            aggressors: Vec::new(),
        }
    }

    pub fn on_cut(mut self) -> Self {
        self.on_cut = true;
        self
    }

    pub fn with_victim(mut self, owner: Owner) -> Self {
        if !self.victims.contains(&owner) {
            self.victims.push(owner);
        }
        self
    }

    pub fn with_aggressor(mut self, owner: Owner) -> Self {
        if !self.aggressors.contains(&owner) {
            self.aggressors.push(owner);
        }
        self
    }

    /// Every owner involved, victims first, without duplicates.
    pub fn srcs(&self) -> Vec<Owner> {
        let mut out = self.victims.clone();
        for a in &self.aggressors {
            if !out.contains(a) {
                out.push(*a);
            }
        }
        out
    }

    pub fn involves_net(&self, net: NetId) -> bool {
        self.victims
            .iter()
            .chain(self.aggressors.iter())
            .any(|o| *o == Owner::Net(net))
    }

    /// Same violation ignoring attribution order.
    pub fn same_site(&self, other: &Marker) -> bool {
        self.bbox == other.bbox
            && self.layer == other.layer
            && self.on_cut == other.on_cut
            && self.rule == other.rule
    }
}
