//! Nom parser for profile match templates
//!
//! ```text
//! expression := node+
//! node       := group | field
//! group      := condition '(' node* ')' [BOOST n]
//! field      := [condition] identifier '<' placeholder '>' modifier*
//! condition  := MUST | MUSTNOT | SHOULD
//! modifier   := BOOST n | FUZZY n | CONSTANT | EXACT | WILDCARD
//! ```
//!
//! Keywords are case-insensitive. A field without a condition is SHOULD.

use super::ast::{Condition, FieldCondition, GroupNode, Modifier, ProfileNode};
use super::error::{ProfileError, ProfileResult};
use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_while, take_while1},
    character::complete::{char, digit1, multispace0, multispace1, satisfy},
    combinator::{map, map_res, not, opt, recognize, value},
    multi::{many0, many1},
    sequence::{delimited, pair, preceded, terminated},
    IResult,
};

// =============================================================================
// ENTRY POINT
// =============================================================================

/// Parse and validate a template into its syntax tree
pub fn parse_template(template: &str) -> ProfileResult<Vec<ProfileNode>> {
    if template.trim().is_empty() {
        return Err(ProfileError::EmptyTemplate);
    }

    let nodes = match terminated(expression, multispace0)(template) {
        Ok(("", nodes)) => nodes,
        Ok((rest, _)) => return Err(syntax_error(template, rest)),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            return Err(syntax_error(template, e.input))
        }
        Err(nom::Err::Incomplete(_)) => {
            return Err(ProfileError::Syntax {
                position: template.len(),
                message: "unexpected end of template".to_string(),
            })
        }
    };

    for node in &nodes {
        validate(node)?;
    }
    Ok(nodes)
}

fn syntax_error(template: &str, rest: &str) -> ProfileError {
    let position = template.len() - rest.len();
    let message = if rest.trim().is_empty() {
        "unexpected end of template".to_string()
    } else {
        let snippet: String = rest.trim_start().chars().take(20).collect();
        format!("unexpected '{}'", snippet)
    };
    ProfileError::Syntax { position, message }
}

/// Reject repeated modifiers and more than one of EXACT, FUZZY and WILDCARD
fn validate(node: &ProfileNode) -> ProfileResult<()> {
    let mut result = Ok(());
    node.for_each_field(&mut |field| {
        if result.is_err() {
            return;
        }
        result = validate_modifiers(field);
    });
    result
}

fn validate_modifiers(field: &FieldCondition) -> ProfileResult<()> {
    for (i, modifier) in field.modifiers.iter().enumerate() {
        let earlier = &field.modifiers[..i];
        if earlier.iter().any(|m| m.keyword() == modifier.keyword()) {
            return Err(ProfileError::DuplicateModifier {
                field: field.field.clone(),
                modifier: modifier.keyword().to_string(),
            });
        }
        if modifier.is_match_mode() {
            if let Some(first) = earlier.iter().find(|m| m.is_match_mode()) {
                return Err(ProfileError::ConflictingModifiers {
                    field: field.field.clone(),
                    first: first.keyword().to_string(),
                    second: modifier.keyword().to_string(),
                });
            }
        }
    }
    Ok(())
}

// =============================================================================
// GRAMMAR
// =============================================================================

fn expression(input: &str) -> IResult<&str, Vec<ProfileNode>> {
    many1(preceded(multispace0, node))(input)
}

fn node(input: &str) -> IResult<&str, ProfileNode> {
    alt((group, field_condition))(input)
}

fn group(input: &str) -> IResult<&str, ProfileNode> {
    let (input, condition) = condition(input)?;
    let (input, children) = delimited(
        pair(multispace0, char('(')),
        many0(preceded(multispace0, node)),
        pair(multispace0, char(')')),
    )(input)?;
    let (input, boost) = opt(preceded(multispace1, boost))(input)?;

    Ok((
        input,
        ProfileNode::Group(GroupNode {
            condition,
            boost,
            children,
        }),
    ))
}

fn field_condition(input: &str) -> IResult<&str, ProfileNode> {
    let (input, condition) = opt(terminated(condition, multispace1))(input)?;
    let (input, field) = identifier(input)?;
    let (input, placeholder) = preceded(multispace0, placeholder)(input)?;
    let (input, modifiers) = many0(preceded(multispace1, modifier))(input)?;

    Ok((
        input,
        ProfileNode::Field(FieldCondition {
            field: field.to_lowercase(),
            placeholder: placeholder.trim().to_string(),
            condition: condition.unwrap_or(Condition::Should),
            modifiers,
        }),
    ))
}

fn condition(input: &str) -> IResult<&str, Condition> {
    alt((
        value(Condition::MustNot, keyword("MUSTNOT")),
        value(Condition::Must, keyword("MUST")),
        value(Condition::Should, keyword("SHOULD")),
    ))(input)
}

fn modifier(input: &str) -> IResult<&str, Modifier> {
    alt((
        map(boost, Modifier::Boost),
        map(
            preceded(pair(keyword("FUZZY"), multispace1), number),
            Modifier::Fuzzy,
        ),
        value(Modifier::Constant, keyword("CONSTANT")),
        value(Modifier::Exact, keyword("EXACT")),
        value(Modifier::Wildcard, keyword("WILDCARD")),
    ))(input)
}

fn boost(input: &str) -> IResult<&str, u32> {
    preceded(pair(keyword("BOOST"), multispace1), number)(input)
}

// =============================================================================
// HELPER PARSERS
// =============================================================================

/// Case-insensitive keyword that is not the prefix of a longer identifier
fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag_no_case(word), not(satisfy(is_ident_char)))
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(satisfy(is_ident_start), take_while(is_ident_char)))(input)
}

fn placeholder(input: &str) -> IResult<&str, &str> {
    delimited(char('<'), take_while1(|c: char| c != '>'), char('>'))(input)
}

fn number(input: &str) -> IResult<&str, u32> {
    map_res(digit1, str::parse::<u32>)(input)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
