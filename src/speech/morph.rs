//! Facial morph targets
//!
//! The core only speaks in terms of [`Morph`], a closed set of ARKit-style
//! blend shape names. Mapping those names onto a concrete mesh is left to a
//! [`MorphTargets`] implementation supplied by the renderer.

use std::collections::HashMap;
use std::fmt;

use super::types::ExpressionId;
use super::viseme::VisemeSymbol;

/// Semantic blend shape name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Morph {
    // Mouth
    JawOpen,
    MouthFunnel,
    MouthClose,
    MouthPressL,
    MouthPressR,
    MouthShrugUpper,
    MouthShrugLower,
    TongueOut,
    MouthUpperUpL,
    MouthUpperUpR,
    MouthLowerDownL,
    MouthLowerDownR,
    MouthLeft,
    MouthRight,
    MouthRollUpper,
    MouthRollLower,
    MouthPucker,
    // Expression
    MouthSmileL,
    MouthSmileR,
    MouthFrownL,
    MouthFrownR,
    CheekSquintL,
    CheekSquintR,
    EyeSquintL,
    EyeSquintR,
    BrowInnerUp,
    BrowDownL,
    BrowDownR,
    BrowOuterUpL,
    BrowOuterUpR,
    EyeWideL,
    EyeWideR,
    NoseSneerL,
    NoseSneerR,
    // Idle / laughter
    EyeBlinkL,
    EyeBlinkR,
    MouthDimpleL,
    MouthDimpleR,
}

/// Number of morphs in the closed set
pub const MORPH_COUNT: usize = 38;

/// Morphs reset before every mouth pose
pub const MOUTH_MORPHS: [Morph; 17] = [
    Morph::JawOpen,
    Morph::MouthFunnel,
    Morph::MouthClose,
    Morph::MouthPressL,
    Morph::MouthPressR,
    Morph::MouthShrugUpper,
    Morph::MouthShrugLower,
    Morph::TongueOut,
    Morph::MouthUpperUpL,
    Morph::MouthUpperUpR,
    Morph::MouthLowerDownL,
    Morph::MouthLowerDownR,
    Morph::MouthLeft,
    Morph::MouthRight,
    Morph::MouthRollUpper,
    Morph::MouthRollLower,
    Morph::MouthPucker,
];

/// Morphs reset before an expression is applied
pub const EXPRESSION_MORPHS: [Morph; 17] = [
    Morph::MouthSmileL,
    Morph::MouthSmileR,
    Morph::MouthFrownL,
    Morph::MouthFrownR,
    Morph::CheekSquintL,
    Morph::CheekSquintR,
    Morph::EyeSquintL,
    Morph::EyeSquintR,
    Morph::BrowInnerUp,
    Morph::BrowDownL,
    Morph::BrowDownR,
    Morph::BrowOuterUpL,
    Morph::BrowOuterUpR,
    Morph::EyeWideL,
    Morph::EyeWideR,
    Morph::NoseSneerL,
    Morph::NoseSneerR,
];

impl Morph {
    pub const ALL: [Morph; MORPH_COUNT] = [
        Morph::JawOpen,
        Morph::MouthFunnel,
        Morph::MouthClose,
        Morph::MouthPressL,
        Morph::MouthPressR,
        Morph::MouthShrugUpper,
        Morph::MouthShrugLower,
        Morph::TongueOut,
        Morph::MouthUpperUpL,
        Morph::MouthUpperUpR,
        Morph::MouthLowerDownL,
        Morph::MouthLowerDownR,
        Morph::MouthLeft,
        Morph::MouthRight,
        Morph::MouthRollUpper,
        Morph::MouthRollLower,
        Morph::MouthPucker,
        Morph::MouthSmileL,
        Morph::MouthSmileR,
        Morph::MouthFrownL,
        Morph::MouthFrownR,
        Morph::CheekSquintL,
        Morph::CheekSquintR,
        Morph::EyeSquintL,
        Morph::EyeSquintR,
        Morph::BrowInnerUp,
        Morph::BrowDownL,
        Morph::BrowDownR,
        Morph::BrowOuterUpL,
        Morph::BrowOuterUpR,
        Morph::EyeWideL,
        Morph::EyeWideR,
        Morph::NoseSneerL,
        Morph::NoseSneerR,
        Morph::EyeBlinkL,
        Morph::EyeBlinkR,
        Morph::MouthDimpleL,
        Morph::MouthDimpleR,
    ];

    /// Blend shape name as it appears in a mesh's morph dictionary
    pub fn name(&self) -> &'static str {
        match self {
            Morph::JawOpen => "jawOpen",
            Morph::MouthFunnel => "mouthFunnel",
            Morph::MouthClose => "mouthClose",
            Morph::MouthPressL => "mouthPress_L",
            Morph::MouthPressR => "mouthPress_R",
            Morph::MouthShrugUpper => "mouthShrugUpper",
            Morph::MouthShrugLower => "mouthShrugLower",
            Morph::TongueOut => "tongueOut",
            Morph::MouthUpperUpL => "mouthUpperUp_L",
            Morph::MouthUpperUpR => "mouthUpperUp_R",
            Morph::MouthLowerDownL => "mouthLowerDown_L",
            Morph::MouthLowerDownR => "mouthLowerDown_R",
            Morph::MouthLeft => "mouthLeft",
            Morph::MouthRight => "mouthRight",
            Morph::MouthRollUpper => "mouthRollUpper",
            Morph::MouthRollLower => "mouthRollLower",
            Morph::MouthPucker => "mouthPucker",
            Morph::MouthSmileL => "mouthSmile_L",
            Morph::MouthSmileR => "mouthSmile_R",
            Morph::MouthFrownL => "mouthFrown_L",
            Morph::MouthFrownR => "mouthFrown_R",
            Morph::CheekSquintL => "cheekSquint_L",
            Morph::CheekSquintR => "cheekSquint_R",
            Morph::EyeSquintL => "eyeSquint_L",
            Morph::EyeSquintR => "eyeSquint_R",
            Morph::BrowInnerUp => "browInnerUp",
            Morph::BrowDownL => "browDown_L",
            Morph::BrowDownR => "browDown_R",
            Morph::BrowOuterUpL => "browOuterUp_L",
            Morph::BrowOuterUpR => "browOuterUp_R",
            Morph::EyeWideL => "eyeWide_L",
            Morph::EyeWideR => "eyeWide_R",
            Morph::NoseSneerL => "noseSneer_L",
            Morph::NoseSneerR => "noseSneer_R",
            Morph::EyeBlinkL => "eyeBlink_L",
            Morph::EyeBlinkR => "eyeBlink_R",
            Morph::MouthDimpleL => "mouthDimple_L",
            Morph::MouthDimpleR => "mouthDimple_R",
        }
    }

    pub fn from_name(name: &str) -> Option<Morph> {
        Morph::ALL.iter().copied().find(|m| m.name() == name)
    }

    pub fn is_mouth(&self) -> bool {
        MOUTH_MORPHS.contains(self)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Morph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Weight for every morph in the closed set, all zero by default
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MorphWeights {
    values: [f32; MORPH_COUNT],
}

impl Default for MorphWeights {
    fn default() -> Self {
        Self::new()
    }
}

impl MorphWeights {
    pub fn new() -> Self {
        Self {
            values: [0.0; MORPH_COUNT],
        }
    }

    pub fn get(&self, morph: Morph) -> f32 {
        self.values[morph.index()]
    }

    pub fn set(&mut self, morph: Morph, value: f32) {
        self.values[morph.index()] = value;
    }

    /// Write a batch of weights, leaving other morphs untouched
    pub fn apply(&mut self, weights: &[(Morph, f32)]) {
        for &(morph, value) in weights {
            self.set(morph, value);
        }
    }

    /// Zero the given morphs
    pub fn reset(&mut self, morphs: &[Morph]) {
        for &morph in morphs {
            self.set(morph, 0.0);
        }
    }

    pub fn reset_mouth(&mut self) {
        self.reset(&MOUTH_MORPHS);
    }

    pub fn reset_expression(&mut self) {
        self.reset(&EXPRESSION_MORPHS);
    }

    /// True when every mouth morph is zero
    pub fn mouth_is_closed(&self) -> bool {
        MOUTH_MORPHS.iter().all(|&m| self.get(m) == 0.0)
    }

    /// Iterate non-zero weights
    pub fn iter_active(&self) -> impl Iterator<Item = (Morph, f32)> + '_ {
        Morph::ALL
            .iter()
            .copied()
            .map(move |m| (m, self.get(m)))
            .filter(|&(_, v)| v != 0.0)
    }
}

/// Mouth pose for a viseme symbol
pub fn viseme_weights(symbol: VisemeSymbol) -> &'static [(Morph, f32)] {
    match symbol {
        VisemeSymbol::A => &[(Morph::JawOpen, 0.3)],
        VisemeSymbol::B => &[(Morph::MouthPressL, 0.4), (Morph::MouthPressR, 0.4)],
        VisemeSymbol::C => &[(Morph::JawOpen, 0.15)],
        VisemeSymbol::D => &[(Morph::JawOpen, 0.2)],
        VisemeSymbol::E => &[(Morph::JawOpen, 0.1)],
        VisemeSymbol::F => &[(Morph::MouthUpperUpL, 0.3), (Morph::MouthUpperUpR, 0.3)],
        VisemeSymbol::G => &[(Morph::JawOpen, 0.25)],
        VisemeSymbol::H => &[(Morph::JawOpen, 0.1)],
        VisemeSymbol::X => &[],
    }
}

/// Base face for an expression. Expressions without a pose return nothing.
pub fn expression_weights(expression: ExpressionId) -> &'static [(Morph, f32)] {
    match expression {
        ExpressionId::Smile => &[
            (Morph::MouthSmileL, 0.7),
            (Morph::MouthSmileR, 0.7),
            (Morph::CheekSquintL, 0.3),
            (Morph::CheekSquintR, 0.3),
            (Morph::EyeSquintL, 0.2),
            (Morph::EyeSquintR, 0.2),
        ],
        ExpressionId::Happy => &[
            (Morph::MouthSmileL, 0.8),
            (Morph::MouthSmileR, 0.8),
            (Morph::CheekSquintL, 0.4),
            (Morph::CheekSquintR, 0.4),
            (Morph::EyeSquintL, 0.3),
            (Morph::EyeSquintR, 0.3),
            (Morph::BrowInnerUp, 0.2),
        ],
        ExpressionId::Sad => &[
            (Morph::MouthFrownL, 0.6),
            (Morph::MouthFrownR, 0.6),
            (Morph::BrowDownL, 0.4),
            (Morph::BrowDownR, 0.4),
            (Morph::EyeSquintL, 0.1),
            (Morph::EyeSquintR, 0.1),
        ],
        ExpressionId::Angry => &[
            (Morph::BrowDownL, 0.7),
            (Morph::BrowDownR, 0.7),
            (Morph::EyeSquintL, 0.5),
            (Morph::EyeSquintR, 0.5),
            (Morph::MouthFrownL, 0.4),
            (Morph::MouthFrownR, 0.4),
            (Morph::NoseSneerL, 0.3),
            (Morph::NoseSneerR, 0.3),
        ],
        ExpressionId::Surprised => &[
            (Morph::BrowInnerUp, 0.8),
            (Morph::BrowOuterUpL, 0.7),
            (Morph::BrowOuterUpR, 0.7),
            (Morph::EyeWideL, 0.9),
            (Morph::EyeWideR, 0.9),
            (Morph::JawOpen, 0.4),
        ],
        ExpressionId::Neutral | ExpressionId::Thinking | ExpressionId::Mischievous => &[],
    }
}

/// Renderer-side morph target table.
///
/// Weights are written by name; names the mesh does not define are skipped.
pub trait MorphTargets {
    /// Resolve a blend shape name to the mesh's influence slot
    fn morph_index(&self, name: &str) -> Option<usize>;

    /// Write one influence value
    fn set_influence(&mut self, index: usize, value: f32);
}

/// Push every weight in `weights` onto a mesh, returning how many resolved
pub fn apply_to_targets<T: MorphTargets + ?Sized>(weights: &MorphWeights, targets: &mut T) -> usize {
    let mut applied = 0;
    for morph in Morph::ALL {
        if let Some(index) = targets.morph_index(morph.name()) {
            targets.set_influence(index, weights.get(morph));
            applied += 1;
        }
    }
    applied
}

/// Simple dictionary-backed morph table
#[derive(Debug, Clone, Default)]
pub struct MorphDictionary {
    indices: HashMap<String, usize>,
    influences: Vec<f32>,
}

impl MorphDictionary {
    /// Build from the mesh's blend shape names in slot order
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut indices = HashMap::new();
        for (i, name) in names.into_iter().enumerate() {
            indices.insert(name.into(), i);
        }
        let influences = vec![0.0; indices.len()];
        Self { indices, influences }
    }

    /// Dictionary covering the complete closed set
    pub fn full() -> Self {
        Self::from_names(Morph::ALL.iter().map(|m| m.name()))
    }

    pub fn influence(&self, name: &str) -> Option<f32> {
        self.indices.get(name).and_then(|&i| self.influences.get(i).copied())
    }

    pub fn influences(&self) -> &[f32] {
        &self.influences
    }
}

impl MorphTargets for MorphDictionary {
    fn morph_index(&self, name: &str) -> Option<usize> {
        self.indices.get(name).copied()
    }

    fn set_influence(&mut self, index: usize, value: f32) {
        if let Some(slot) = self.influences.get_mut(index) {
            *slot = value;
        }
    }
}
