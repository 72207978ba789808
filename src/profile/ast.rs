//! Syntax tree of a profile match template

use serde::{Deserialize, Serialize};
use std::fmt;
use strum::Display;

/// Boolean occurrence of a clause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Condition {
    Must,
    #[strum(serialize = "MUSTNOT")]
    MustNot,
    Should,
}

impl Condition {
    /// Query-syntax prefix for this occurrence
    pub fn prefix(&self) -> &'static str {
        match self {
            Condition::Must => "+",
            Condition::MustNot => "-",
            Condition::Should => "",
        }
    }
}

/// Trailing modifier of a field condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Modifier {
    Boost(u32),
    Fuzzy(u32),
    Constant,
    Exact,
    Wildcard,
}

impl Modifier {
    pub fn keyword(&self) -> &'static str {
        match self {
            Modifier::Boost(_) => "BOOST",
            Modifier::Fuzzy(_) => "FUZZY",
            Modifier::Constant => "CONSTANT",
            Modifier::Exact => "EXACT",
            Modifier::Wildcard => "WILDCARD",
        }
    }

    /// `EXACT`, `FUZZY` and `WILDCARD` each change how the value is matched
    pub fn is_match_mode(&self) -> bool {
        matches!(self, Modifier::Fuzzy(_) | Modifier::Exact | Modifier::Wildcard)
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modifier::Boost(n) | Modifier::Fuzzy(n) => write!(f, "{} {}", self.keyword(), n),
            _ => f.write_str(self.keyword()),
        }
    }
}

/// `[condition] field<placeholder> modifiers...`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldCondition {
    pub field: String,
    /// Payload key, or the literal value when `CONSTANT` is set
    pub placeholder: String,
    pub condition: Condition,
    pub modifiers: Vec<Modifier>,
}

impl FieldCondition {
    pub fn boost(&self) -> Option<u32> {
        self.modifiers.iter().find_map(|m| match m {
            Modifier::Boost(n) => Some(*n),
            _ => None,
        })
    }

    pub fn fuzzy(&self) -> Option<u32> {
        self.modifiers.iter().find_map(|m| match m {
            Modifier::Fuzzy(n) => Some(*n),
            _ => None,
        })
    }

    pub fn is_constant(&self) -> bool {
        self.modifiers.contains(&Modifier::Constant)
    }

    pub fn is_exact(&self) -> bool {
        self.modifiers.contains(&Modifier::Exact)
    }

    pub fn is_wildcard(&self) -> bool {
        self.modifiers.contains(&Modifier::Wildcard)
    }
}

/// `condition ( children ) [BOOST n]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupNode {
    pub condition: Condition,
    pub boost: Option<u32>,
    pub children: Vec<ProfileNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileNode {
    Group(GroupNode),
    Field(FieldCondition),
}

impl ProfileNode {
    /// Visit every field condition, depth first
    pub fn for_each_field<'a>(&'a self, visit: &mut dyn FnMut(&'a FieldCondition)) {
        match self {
            ProfileNode::Field(field) => visit(field),
            ProfileNode::Group(group) => {
                for child in &group.children {
                    child.for_each_field(visit);
                }
            }
        }
    }

    pub fn for_each_field_mut(&mut self, visit: &mut dyn FnMut(&mut FieldCondition)) {
        match self {
            ProfileNode::Field(field) => visit(field),
            ProfileNode::Group(group) => {
                for child in &mut group.children {
                    child.for_each_field_mut(visit);
                }
            }
        }
    }
}
