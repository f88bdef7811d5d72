use crate::error::PipelineError;
use crate::geometry::geometry_model::{Geometry, NodeDescriptor};

// ============================================================================
// Minimal CSS selector matcher over geometry snapshots
// ============================================================================
//
// Supports: type, `*`, `#id`, `.class`, `[attr]`, `[attr=value]`,
// `:nth-of-type(n)`, `:first-of-type`, interaction-state pseudo-classes
// (matched as if the state were active), descendant and child combinators,
// and comma-separated lists.

/// Pseudo-classes describing transient interaction state. They do not narrow
/// the element set a patch lands on.
const STATE_PSEUDO_CLASSES: &[&str] = &[
    "hover",
    "active",
    "focus",
    "focus-visible",
    "focus-within",
    "checked",
    "visited",
    "link",
];

#[derive(Debug, Clone, PartialEq)]
pub struct SelectorList {
    selectors: Vec<ComplexSelector>,
}

#[derive(Debug, Clone, PartialEq)]
struct ComplexSelector {
    /// Compounds left to right; each carries the combinator linking it to the
    /// previous compound (ignored for the first).
    parts: Vec<(Combinator, Compound)>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq, Default)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrMatch>,
    nth_of_type: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
struct AttrMatch {
    name: String,
    value: Option<String>,
}

pub fn parse_selector(input: &str) -> Result<SelectorList, PipelineError> {
    let err = |reason: &str| PipelineError::Selector {
        selector: input.to_string(),
        reason: reason.to_string(),
    };

    let mut selectors = Vec::new();
    for part in split_top_level(input) {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            return Err(err("empty selector in list"));
        }
        selectors.push(parse_complex(trimmed).map_err(|r| err(&r))?);
    }
    if selectors.is_empty() {
        return Err(err("empty selector"));
    }
    Ok(SelectorList { selectors })
}

impl SelectorList {
    pub fn matches(&self, geometry: &Geometry, node: &NodeDescriptor) -> bool {
        self.selectors
            .iter()
            .any(|s| matches_complex(&s.parts, s.parts.len() - 1, geometry, node))
    }

    pub fn select<'a>(&self, geometry: &'a Geometry) -> Vec<&'a NodeDescriptor> {
        geometry
            .iter()
            .filter(|node| self.matches(geometry, node))
            .collect()
    }
}

/// Split on commas that are not nested inside brackets or parentheses.
fn split_top_level(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in input.chars() {
        match (quote, c) {
            (Some(q), _) if c == q => {
                quote = None;
                current.push(c);
            }
            (Some(_), _) => current.push(c),
            (None, '"') | (None, '\'') => {
                quote = Some(c);
                current.push(c);
            }
            (None, '[') | (None, '(') => {
                depth += 1;
                current.push(c);
            }
            (None, ']') | (None, ')') => {
                depth -= 1;
                current.push(c);
            }
            (None, ',') if depth == 0 => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

fn parse_complex(input: &str) -> Result<ComplexSelector, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut pos = 0;
    let mut parts = Vec::new();
    let mut pending = Combinator::Descendant;

    while pos < chars.len() {
        let c = chars[pos];
        if c.is_whitespace() {
            pos += 1;
            continue;
        }
        if c == '>' {
            if parts.is_empty() {
                return Err("selector starts with a combinator".into());
            }
            pending = Combinator::Child;
            pos += 1;
            continue;
        }
        if c == '+' || c == '~' {
            return Err(format!("sibling combinator '{}' is not supported", c));
        }
        let (compound, next) = parse_compound(&chars, pos)?;
        parts.push((pending, compound));
        pending = Combinator::Descendant;
        pos = next;
    }

    if parts.is_empty() {
        return Err("empty selector".into());
    }
    if pending == Combinator::Child {
        return Err("selector ends with a combinator".into());
    }
    Ok(ComplexSelector { parts })
}

fn parse_compound(chars: &[char], mut pos: usize) -> Result<(Compound, usize), String> {
    let mut compound = Compound::default();
    let start = pos;

    while pos < chars.len() {
        let c = chars[pos];
        match c {
            '*' if pos == start => pos += 1,
            '#' => {
                let (ident, next) = read_ident(chars, pos + 1)?;
                compound.id = Some(ident);
                pos = next;
            }
            '.' => {
                let (ident, next) = read_ident(chars, pos + 1)?;
                compound.classes.push(ident);
                pos = next;
            }
            '[' => {
                let (attr, next) = read_attr(chars, pos + 1)?;
                compound.attrs.push(attr);
                pos = next;
            }
            ':' => {
                if chars.get(pos + 1) == Some(&':') {
                    return Err("pseudo-elements are not supported".into());
                }
                let (name, next) = read_ident(chars, pos + 1)?;
                pos = next;
                match name.as_str() {
                    "nth-of-type" => {
                        if chars.get(pos) != Some(&'(') {
                            return Err("nth-of-type requires an argument".into());
                        }
                        let close = chars[pos..]
                            .iter()
                            .position(|&ch| ch == ')')
                            .ok_or("unterminated nth-of-type")?;
                        let arg: String = chars[pos + 1..pos + close].iter().collect();
                        let n = arg
                            .trim()
                            .parse::<usize>()
                            .map_err(|_| format!("unsupported nth-of-type argument '{}'", arg))?;
                        compound.nth_of_type = Some(n);
                        pos += close + 1;
                    }
                    "first-of-type" => compound.nth_of_type = Some(1),
                    other if STATE_PSEUDO_CLASSES.contains(&other) => {}
                    other => return Err(format!("unsupported pseudo-class ':{}'", other)),
                }
            }
            c if c.is_whitespace() || c == '>' || c == '+' || c == '~' => break,
            c if pos == start && is_ident_char(c) => {
                let (ident, next) = read_ident(chars, pos)?;
                compound.tag = Some(ident.to_lowercase());
                pos = next;
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }

    if pos == start {
        return Err("empty compound selector".into());
    }
    Ok((compound, pos))
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_' || c == '\\' || !c.is_ascii()
}

fn read_ident(chars: &[char], mut pos: usize) -> Result<(String, usize), String> {
    let mut out = String::new();
    while pos < chars.len() {
        let c = chars[pos];
        if c == '\\' {
            // CSS escape: up to six hex digits plus one optional space, or a
            // single literal character.
            let mut hex = String::new();
            let mut p = pos + 1;
            while p < chars.len() && hex.len() < 6 && chars[p].is_ascii_hexdigit() {
                hex.push(chars[p]);
                p += 1;
            }
            if hex.is_empty() {
                let literal = chars.get(pos + 1).ok_or("dangling escape")?;
                out.push(*literal);
                pos += 2;
            } else {
                let code = u32::from_str_radix(&hex, 16).map_err(|e| e.to_string())?;
                out.push(char::from_u32(code).unwrap_or('\u{FFFD}'));
                if chars.get(p) == Some(&' ') {
                    p += 1;
                }
                pos = p;
            }
            continue;
        }
        if c.is_alphanumeric() || c == '-' || c == '_' || !c.is_ascii() {
            out.push(c);
            pos += 1;
        } else {
            break;
        }
    }
    if out.is_empty() {
        return Err("expected identifier".into());
    }
    Ok((out, pos))
}

fn read_attr(chars: &[char], pos: usize) -> Result<(AttrMatch, usize), String> {
    let close = chars[pos..]
        .iter()
        .position(|&c| c == ']')
        .ok_or("unterminated attribute selector")?;
    let body: String = chars[pos..pos + close].iter().collect();
    let next = pos + close + 1;

    match body.split_once('=') {
        None => {
            let name = body.trim();
            if name.is_empty() {
                return Err("empty attribute name".into());
            }
            Ok((
                AttrMatch {
                    name: name.to_lowercase(),
                    value: None,
                },
                next,
            ))
        }
        Some((name, value)) => {
            let name = name.trim();
            if name.ends_with(|c: char| matches!(c, '~' | '|' | '^' | '$' | '*')) {
                return Err("only exact attribute matching is supported".into());
            }
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
            Ok((
                AttrMatch {
                    name: name.to_lowercase(),
                    value: Some(value.to_string()),
                },
                next,
            ))
        }
    }
}

fn matches_compound(compound: &Compound, node: &NodeDescriptor) -> bool {
    if let Some(tag) = &compound.tag {
        if !node.tag.eq_ignore_ascii_case(tag) {
            return false;
        }
    }
    if let Some(id) = &compound.id {
        if node.id.as_deref() != Some(id.as_str()) {
            return false;
        }
    }
    if !compound.classes.iter().all(|c| node.has_class(c)) {
        return false;
    }
    for attr in &compound.attrs {
        match (node.attr(&attr.name), &attr.value) {
            (None, _) => return false,
            (Some(actual), Some(expected)) if actual != expected => return false,
            _ => {}
        }
    }
    if let Some(n) = compound.nth_of_type {
        if node.nth_of_type != n {
            return false;
        }
    }
    true
}

fn matches_complex(
    parts: &[(Combinator, Compound)],
    i: usize,
    geometry: &Geometry,
    node: &NodeDescriptor,
) -> bool {
    let (combinator, compound) = &parts[i];
    if !matches_compound(compound, node) {
        return false;
    }
    if i == 0 {
        return true;
    }
    match combinator {
        Combinator::Child => geometry
            .parent_of(node)
            .is_some_and(|parent| matches_complex(parts, i - 1, geometry, parent)),
        Combinator::Descendant => geometry
            .ancestors_of(node)
            .into_iter()
            .any(|ancestor| matches_complex(parts, i - 1, geometry, ancestor)),
    }
}
