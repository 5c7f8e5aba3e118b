use std::fmt::Display;

use serde::{Deserialize, Serialize};

use super::{abstract_index::AbstractIndex, dimension::Dimension, slot::Slot};
use crate::symbolic::Atom;

/// The representation kinds an index can carry.
///
/// Dualisable kinds come in pairs ([`Rep::LorentzUp`] and [`Rep::LorentzDown`],
/// ...), the others are self-dual. Two slots contract iff their kinds are dual
/// to each other.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Rep {
    LorentzUp,
    LorentzDown,
    /// Self-dual Lorentz index, with metric diag(1,-1,-1,-1,...)
    Minkowski,
    Bispinor,
    Euclidean,
    ColorFundamental,
    ColorAntiFundamental,
    ColorAdjoint,
    ColorSextet,
    ColorAntiSextet,
}

impl Rep {
    pub const ALL: [Rep; 10] = [
        Rep::LorentzUp,
        Rep::LorentzDown,
        Rep::Minkowski,
        Rep::Bispinor,
        Rep::Euclidean,
        Rep::ColorFundamental,
        Rep::ColorAntiFundamental,
        Rep::ColorAdjoint,
        Rep::ColorSextet,
        Rep::ColorAntiSextet,
    ];

    /// The function name used for slots of this kind, e.g. `loru(4,mu)`.
    pub const fn name(self) -> &'static str {
        match self {
            Rep::LorentzUp => "loru",
            Rep::LorentzDown => "lord",
            Rep::Minkowski => "mink",
            Rep::Bispinor => "bis",
            Rep::Euclidean => "euc",
            Rep::ColorFundamental => "cof",
            Rep::ColorAntiFundamental => "coaf",
            Rep::ColorAdjoint => "coad",
            Rep::ColorSextet => "cos",
            Rep::ColorAntiSextet => "coas",
        }
    }

    pub fn from_name(name: &str) -> Option<Rep> {
        Rep::ALL.into_iter().find(|r| r.name() == name)
    }

    pub const fn dual(self) -> Rep {
        match self {
            Rep::LorentzUp => Rep::LorentzDown,
            Rep::LorentzDown => Rep::LorentzUp,
            Rep::ColorFundamental => Rep::ColorAntiFundamental,
            Rep::ColorAntiFundamental => Rep::ColorFundamental,
            Rep::ColorSextet => Rep::ColorAntiSextet,
            Rep::ColorAntiSextet => Rep::ColorSextet,
            other => other,
        }
    }

    pub fn is_self_dual(self) -> bool {
        self.dual() == self
    }

    /// Representative of the dual pair, used to compare kinds regardless of variance.
    pub fn base(self) -> Rep {
        match self {
            Rep::LorentzDown => Rep::LorentzUp,
            Rep::ColorAntiFundamental => Rep::ColorFundamental,
            Rep::ColorAntiSextet => Rep::ColorSextet,
            other => other,
        }
    }

    pub fn matches(self, other: Rep) -> bool {
        self.dual() == other
    }

    pub fn is_lorentz(self) -> bool {
        matches!(self, Rep::LorentzUp | Rep::LorentzDown | Rep::Minkowski)
    }

    /// Whether component `i` picks up a minus sign from the metric when contracted.
    pub fn is_neg(self, i: usize) -> bool {
        self.is_lorentz() && i > 0
    }

    pub fn metric_sign(self, i: usize) -> i64 {
        if self.is_neg(i) {
            -1
        } else {
            1
        }
    }
}

impl Display for Rep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A representation kind together with its dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Representation {
    pub rep: Rep,
    pub dim: Dimension,
}

impl Representation {
    pub fn new(rep: Rep, dim: impl Into<Dimension>) -> Self {
        Representation {
            rep,
            dim: dim.into(),
        }
    }

    pub fn new_slot(&self, aind: impl Into<AbstractIndex>) -> Slot {
        Slot {
            aind: aind.into(),
            rep: self.clone(),
        }
    }

    pub fn dual(&self) -> Self {
        Representation {
            rep: self.rep.dual(),
            dim: self.dim.clone(),
        }
    }

    pub fn to_atom(&self, aind: &AbstractIndex) -> Atom {
        Atom::fun(self.rep.name(), [self.dim.to_atom(), aind.to_atom()])
    }
}

impl Display for Representation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.rep, self.dim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duals() {
        for rep in Rep::ALL {
            assert_eq!(rep.dual().dual(), rep);
            assert_eq!(Rep::from_name(rep.name()), Some(rep));
            assert_eq!(rep.dual().base(), rep.base());
        }
        assert!(Rep::Bispinor.is_self_dual());
        assert!(!Rep::LorentzUp.is_self_dual());
        assert!(Rep::LorentzUp.matches(Rep::LorentzDown));
        assert!(!Rep::LorentzUp.matches(Rep::LorentzUp));
        assert!(Rep::Minkowski.matches(Rep::Minkowski));
        assert_eq!(Rep::from_name("spin"), None);
    }

    #[test]
    fn metric_signs() {
        let signs: Vec<i64> = (0..4).map(|i| Rep::LorentzDown.metric_sign(i)).collect();
        assert_eq!(signs, vec![1, -1, -1, -1]);
        assert!(!Rep::Bispinor.is_neg(2));
        assert!(!Rep::Euclidean.is_neg(1));
    }
}
