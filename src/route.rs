//! Route-path pattern DSL, the typed capture value, and the trie that
//! matches request paths against registered patterns.
//!
//! A pattern is `/`-separated components. Each component is one of:
//!
//! - a bare condition — `users`, `*`, `**`, or a regex written `^...$`
//! - a full form — `:ident{condition}<transform>{params}`, where every
//!   part after `:ident` is optional
//!
//! `ident` binds the matched text (or, for `**`, the whole remaining path
//! joined by `/`) into the request's named captures. `transform` names a
//! registered string-to-value conversion; a transform that returns `None`
//! fails the whole component. `params` is a brace-wrapped list of
//! `@name[?]: {cond}[&&|| {cond}...]<transform>` clauses tested against the
//! request's query/form items.
//!
//! Children at a trie node are tried fixed → regex → `*` → `**`, so a
//! specific route always shadows a wildcard registered at the same depth
//! regardless of registration order.

use crate::limits::RouteLimits;
use regex::Regex;
use std::{collections::HashMap, sync::Arc};

/// A captured path segment or transformed query/form parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Captured {
    Str(String),
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl Captured {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Captured::Str(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Captured::Bool(v) => Some(*v),
            _ => None,
        }
    }
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Captured::I8(v) => Some(v as i64),
            Captured::I16(v) => Some(v as i64),
            Captured::I32(v) => Some(v as i64),
            Captured::I64(v) => Some(v),
            _ => None,
        }
    }
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Captured::U8(v) => Some(v as u64),
            Captured::U16(v) => Some(v as u64),
            Captured::U32(v) => Some(v as u64),
            Captured::U64(v) => Some(v),
            _ => None,
        }
    }
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Captured::F32(v) => Some(v as f64),
            Captured::F64(v) => Some(v),
            _ => None,
        }
    }
}

/// What a single path component requires to match.
#[derive(Debug, Clone)]
pub(crate) enum Condition {
    Fixed(String),
    Regex(Arc<Regex>),
    Star,
    DoubleStar,
}

impl Condition {
    /// Lower precedence value wins: tried first.
    fn rank(&self) -> u8 {
        match self {
            Condition::Fixed(_) => 0,
            Condition::Regex(_) => 1,
            Condition::Star => 2,
            Condition::DoubleStar => 3,
        }
    }
}

/// A fixed-text or regex term inside a `PARAMS` clause.
#[derive(Debug, Clone)]
enum ParamTerm {
    Fixed(String),
    Regex(Arc<Regex>),
}

impl ParamTerm {
    fn matches(&self, value: &str) -> bool {
        match self {
            ParamTerm::Fixed(s) => s == value,
            ParamTerm::Regex(r) => r.is_match(value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BoolOp {
    And,
    Or,
}

/// One `@name: {cond} && {cond} || ...` clause. Evaluated left-to-right,
/// `&&` binding tighter than `||` (standard short-circuit precedence).
#[derive(Debug, Clone)]
struct ParamClause {
    name: String,
    optional: bool,
    terms: Vec<(ParamTerm, Option<BoolOp>)>,
    transform: Option<String>,
}

impl ParamClause {
    fn eval(&self, value: Option<&str>, transforms: &TransformRegistry) -> Option<(String, Option<Captured>)> {
        let Some(value) = value else {
            return if self.optional { Some((self.name.clone(), None)) } else { None };
        };

        if !self.terms.is_empty() {
            // Fold left-to-right: AND binds tighter, so accumulate an
            // AND-run and only fold it into the OR accumulator at an `Or`
            // boundary or at the end.
            let mut or_acc: Option<bool> = None;
            let mut and_acc = true;

            for (term, op) in &self.terms {
                and_acc = and_acc && term.matches(value);
                match op {
                    Some(BoolOp::And) | None => {}
                    Some(BoolOp::Or) => {
                        or_acc = Some(or_acc.unwrap_or(false) || and_acc);
                        and_acc = true;
                    }
                }
            }
            let passed = or_acc.unwrap_or(false) || and_acc;
            if !passed {
                return None;
            }
        }

        let captured = match &self.transform {
            Some(name) => Some(transforms.apply(name, value)?),
            None => None,
        };

        Some((self.name.clone(), captured))
    }
}

/// One parsed path component.
#[derive(Debug, Clone)]
pub(crate) struct Component {
    condition: Condition,
    ident: Option<String>,
    transform: Option<String>,
    params: Vec<ParamClause>,
}

#[derive(Debug, PartialEq)]
pub(crate) enum ParseError {
    EmptyCondition,
    InvalidRegex,
    UnterminatedBrace,
    DoubleStarNotLast,
}

/// A fully parsed route pattern, ready to be inserted into a [`Trie`].
#[derive(Debug, Clone)]
pub(crate) struct Pattern {
    pub(crate) components: Vec<Component>,
    /// Whether `raw` ended in an explicit `/` beyond the root pattern
    /// (`/x/`, not `/x` or `/`). A handler registered this way only
    /// matches requests whose own path ended in `/`; the dispatcher
    /// redirects a slash-less GET miss to the slash-terminated URL
    /// instead of ever invoking it directly (spec §4.4/§8).
    pub(crate) trailing_slash: bool,
}

impl Pattern {
    pub(crate) fn parse(raw: &str, limits: &RouteLimits) -> Result<Self, ParseError> {
        let raw = raw.trim_start_matches('/');
        let trailing_slash = raw.ends_with('/');
        let raw = raw.trim_end_matches('/');
        let mut components = Vec::new();

        let parts: Vec<&str> = if raw.is_empty() { Vec::new() } else { raw.split('/').collect() };

        for (i, part) in parts.iter().enumerate() {
            if components.len() >= limits.max_trie_depth {
                break;
            }
            let component = parse_component(part)?;
            if matches!(component.condition, Condition::DoubleStar) && i != parts.len() - 1 {
                return Err(ParseError::DoubleStarNotLast);
            }
            components.push(component);
        }

        Ok(Pattern {
            components,
            trailing_slash: trailing_slash && !components.is_empty(),
        })
    }
}

fn parse_component(raw: &str) -> Result<Component, ParseError> {
    let mut rest = raw;

    let ident = if let Some(after_colon) = rest.strip_prefix(':') {
        let end = after_colon
            .find(|c| c == '{' || c == '<')
            .unwrap_or(after_colon.len());
        let (name, tail) = after_colon.split_at(end);
        rest = tail;
        Some(name.to_owned())
    } else {
        None
    };

    let rest = rest.strip_prefix('{').unwrap_or(rest);
    let (cond_str, rest) = split_top_level(rest, '}').unwrap_or((rest, ""));

    let condition = parse_condition(cond_str)?;

    let (transform, rest) = if let Some(after) = rest.strip_prefix('<') {
        let end = after.find('>').unwrap_or(after.len());
        let (name, tail) = after.split_at(end);
        (Some(name.to_owned()), tail.strip_prefix('>').unwrap_or(tail))
    } else {
        (None, rest)
    };

    let params = if let Some(after) = rest.strip_prefix('{') {
        let (body, _) = split_top_level(after, '}').unwrap_or((after, ""));
        parse_params(body)?
    } else {
        Vec::new()
    };

    Ok(Component {
        condition,
        ident,
        transform,
        params,
    })
}

/// Splits `s` at the matching top-level `close`, returning `(before, after)`.
fn split_top_level(s: &str, close: char) -> Option<(&str, &str)> {
    let mut depth = 0i32;
    for (i, c) in s.char_indices() {
        match c {
            '{' => depth += 1,
            c if c == close && depth == 0 => return Some((&s[..i], &s[i + 1..])),
            c if c == close => depth -= 1,
            _ => {}
        }
    }
    None
}

fn parse_condition(raw: &str) -> Result<Condition, ParseError> {
    if raw.is_empty() {
        return Err(ParseError::EmptyCondition);
    }
    match raw {
        "**" => Ok(Condition::DoubleStar),
        "*" => Ok(Condition::Star),
        _ if raw.starts_with('^') && raw.ends_with('$') => Regex::new(raw)
            .map(|r| Condition::Regex(Arc::new(r)))
            .map_err(|_| ParseError::InvalidRegex),
        _ => Ok(Condition::Fixed(raw.to_owned())),
    }
}

fn parse_params(body: &str) -> Result<Vec<ParamClause>, ParseError> {
    body.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_param_clause)
        .collect()
}

fn parse_param_clause(raw: &str) -> Result<ParamClause, ParseError> {
    let raw = raw.strip_prefix('@').unwrap_or(raw);
    let (name_part, rest) = raw.split_once(':').ok_or(ParseError::UnterminatedBrace)?;
    let name_part = name_part.trim();
    let (optional, name) = match name_part.strip_prefix('?') {
        Some(n) => (true, n.trim().to_owned()),
        None => (false, name_part.to_owned()),
    };

    let rest = rest.trim();
    let (transform, conditions_src) = if let Some(idx) = rest.rfind('<') {
        if rest[idx..].ends_with('>') {
            (Some(rest[idx + 1..rest.len() - 1].to_owned()), &rest[..idx])
        } else {
            (None, rest)
        }
    } else {
        (None, rest)
    };

    let mut terms = Vec::new();
    let mut cursor = conditions_src.trim();
    loop {
        cursor = cursor.trim_start();
        if !cursor.starts_with('{') {
            break;
        }
        let (inner, after) = split_top_level(&cursor[1..], '}').ok_or(ParseError::UnterminatedBrace)?;
        let term = if inner.starts_with('^') && inner.ends_with('$') {
            Regex::new(inner)
                .map(|r| ParamTerm::Regex(Arc::new(r)))
                .map_err(|_| ParseError::InvalidRegex)?
        } else {
            ParamTerm::Fixed(inner.to_owned())
        };

        let after = after.trim_start();
        let (op, after) = if let Some(a) = after.strip_prefix("&&") {
            (Some(BoolOp::And), a)
        } else if let Some(a) = after.strip_prefix("||") {
            (Some(BoolOp::Or), a)
        } else {
            (None, after)
        };

        terms.push((term, op));
        cursor = after;
    }

    Ok(ParamClause {
        name,
        optional,
        terms,
        transform,
    })
}

/// Named string-to-[`Captured`] conversions, seeded with the built-ins and
/// extensible by the host application.
pub(crate) struct TransformRegistry {
    builtins: HashMap<&'static str, fn(&str) -> Option<Captured>>,
    custom: HashMap<String, Arc<dyn Fn(&str) -> Option<Captured> + Send + Sync>>,
}

macro_rules! int_transform {
    ($map:expr, $base_name:literal, $variant:ident, $ty:ty) => {
        $map.insert(concat!($base_name), (|s: &str| <$ty>::from_str_radix(s, 10).ok().map(Captured::$variant)) as fn(&str) -> Option<Captured>);
        $map.insert(concat!($base_name, "Hex"), (|s: &str| <$ty>::from_str_radix(s.trim_start_matches("0x"), 16).ok().map(Captured::$variant)) as fn(&str) -> Option<Captured>);
        $map.insert(concat!($base_name, "Bin"), (|s: &str| <$ty>::from_str_radix(s.trim_start_matches("0b"), 2).ok().map(Captured::$variant)) as fn(&str) -> Option<Captured>);
    };
}

impl TransformRegistry {
    pub(crate) fn with_builtins() -> Self {
        let mut builtins: HashMap<&'static str, fn(&str) -> Option<Captured>> = HashMap::new();

        builtins.insert("String", |s| Some(Captured::Str(s.to_owned())));
        builtins.insert("Bool", |s| s.parse().ok().map(Captured::Bool));
        builtins.insert("Float", |s| s.parse().ok().map(Captured::F32));
        builtins.insert("Double", |s| s.parse().ok().map(Captured::F64));

        int_transform!(builtins, "Int8", I8, i8);
        int_transform!(builtins, "Int16", I16, i16);
        int_transform!(builtins, "Int32", I32, i32);
        int_transform!(builtins, "Int64", I64, i64);
        int_transform!(builtins, "UInt8", U8, u8);
        int_transform!(builtins, "UInt16", U16, u16);
        int_transform!(builtins, "UInt32", U32, u32);
        int_transform!(builtins, "UInt64", U64, u64);

        TransformRegistry {
            builtins,
            custom: HashMap::new(),
        }
    }

    pub(crate) fn register<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&str) -> Option<Captured> + Send + Sync + 'static,
    {
        self.custom.insert(name.into(), Arc::new(f));
    }

    fn apply(&self, name: &str, value: &str) -> Option<Captured> {
        if let Some(f) = self.builtins.get(name) {
            return f(value);
        }
        self.custom.get(name).and_then(|f| f(value))
    }
}

/// A trie node storing handlers of type `T` under route patterns.
///
/// Children are kept sorted by [`Condition::rank`] so matching always tries
/// fixed text, then regex, then `*`, then `**`, regardless of the order
/// routes were registered in.
pub(crate) struct Trie<T> {
    condition: Condition,
    ident: Option<String>,
    transform: Option<String>,
    params: Vec<ParamClause>,
    handler: Option<T>,
    /// Set from [`Pattern::trailing_slash`] when `handler` was inserted; a
    /// handler registered this way only matches a request whose path
    /// actually ended in `/` (see [`Trie::matches`]).
    handler_requires_slash: bool,
    children: Vec<Trie<T>>,
}

impl<T> Trie<T> {
    pub(crate) fn new_root() -> Self {
        Trie {
            condition: Condition::Fixed(String::new()),
            ident: None,
            transform: None,
            params: Vec::new(),
            handler: None,
            handler_requires_slash: false,
            children: Vec::new(),
        }
    }

    /// Descends to the node for `components`, creating intermediate nodes as
    /// needed, and returns it. Shared by [`insert`](Trie::insert) (which
    /// unconditionally overwrites the node's handler, the right behavior for
    /// routes — one handler per path) and [`entry`](Trie::entry) (which
    /// hands the caller the handler slot itself, so middleware can
    /// accumulate multiple filters per path instead of overwriting).
    fn descend_or_create(&mut self, components: Vec<Component>) -> &mut Trie<T> {
        let mut node = self;
        for component in components {
            let idx = node.children.iter().position(|c| component_eq(&c.condition, &component.condition));
            let idx = match idx {
                Some(i) => i,
                None => {
                    let insert_at = node
                        .children
                        .iter()
                        .position(|c| c.condition.rank() > component.condition.rank())
                        .unwrap_or(node.children.len());
                    node.children.insert(
                        insert_at,
                        Trie {
                            condition: component.condition.clone(),
                            ident: component.ident.clone(),
                            transform: component.transform.clone(),
                            params: component.params.clone(),
                            handler: None,
                            handler_requires_slash: false,
                            children: Vec::new(),
                        },
                    );
                    insert_at
                }
            };
            node = &mut node.children[idx];
            // Refresh ident/transform/params in case this segment was first
            // created implicitly by a longer sibling pattern.
            node.ident = component.ident;
            node.transform = component.transform;
            node.params = component.params;
        }
        node
    }

    /// Inserts `handler` under `pattern`, creating intermediate nodes as needed.
    pub(crate) fn insert(&mut self, pattern: Pattern, handler: T) {
        let trailing_slash = pattern.trailing_slash;
        let node = self.descend_or_create(pattern.components);
        node.handler = Some(handler);
        node.handler_requires_slash = trailing_slash;
    }

    /// Descends to (creating as needed) the node for `pattern` and returns a
    /// mutable handle to its handler slot, without touching
    /// `handler_requires_slash`. Unlike [`insert`](Trie::insert), which
    /// always overwrites the slot, this lets a caller accumulate into it —
    /// [`server::dispatcher::Router::middleware_for`
    /// ](crate::server::dispatcher::Router::middleware_for) uses it to push
    /// onto a `Vec` of filters already registered at the same pattern
    /// instead of replacing them.
    pub(crate) fn entry(&mut self, pattern: Pattern) -> &mut Option<T> {
        &mut self.descend_or_create(pattern.components).handler
    }

    /// Returns the handler registered at the exact root (pattern `/` or an
    /// empty path), if any.
    ///
    /// An empty pattern never creates a child node (see [`insert`
    /// ](Trie::insert)), so [`matches`](Trie::matches) — which only descends
    /// into children — can never find it; callers check
    /// `path_segments().is_empty()` and use this instead.
    pub(crate) fn root_handler(&self) -> Option<&T> {
        self.handler.as_ref()
    }

    /// Whether any node in this trie — root or descendant — has a handler
    /// registered, regardless of path. Used for the RFC 7230 asterisk-form
    /// `OPTIONS *` response, which reports every method with a route
    /// anywhere rather than one scoped to a particular path.
    pub(crate) fn has_any_handler(&self) -> bool {
        self.handler.is_some() || self.children.iter().any(Trie::has_any_handler)
    }

    /// Attempts to match `segments` against this trie, returning the
    /// deepest handler found plus the captures accumulated along the way.
    ///
    /// `has_trailing_slash` reflects whether the request path this is
    /// matched against itself ended in `/`; a handler registered with an
    /// explicit trailing slash (`Pattern::trailing_slash`) only matches
    /// when this is `true` (see spec §4.4's slash-redirect rule, applied
    /// by the caller in `server::dispatcher`).
    pub(crate) fn matches(
        &self,
        segments: &[&str],
        query: &[(String, String)],
        transforms: &TransformRegistry,
        limits: &RouteLimits,
        has_trailing_slash: bool,
    ) -> Option<(&T, MatchCaptures)> {
        let mut captures = MatchCaptures::default();
        self.descend(segments, query, transforms, limits, has_trailing_slash, &mut captures)
            .map(|handler| (handler, captures))
    }

    fn descend<'t>(
        &'t self,
        segments: &[&str],
        query: &[(String, String)],
        transforms: &TransformRegistry,
        limits: &RouteLimits,
        has_trailing_slash: bool,
        captures: &mut MatchCaptures,
    ) -> Option<&'t T> {
        for child in &self.children {
            // Each sibling gets its own scratch copy so a candidate that
            // matches partway but ultimately fails (no handler at this
            // depth, a later param clause rejects it) can't leak the
            // identities/properties it bound into the next candidate tried.
            let mut scratch = captures.clone();
            if let Some(found) =
                child.try_descend(segments, query, transforms, limits, has_trailing_slash, &mut scratch)
            {
                *captures = scratch;
                return Some(found);
            }
        }
        None
    }

    fn try_descend<'t>(
        &'t self,
        segments: &[&str],
        query: &[(String, String)],
        transforms: &TransformRegistry,
        limits: &RouteLimits,
        has_trailing_slash: bool,
        captures: &mut MatchCaptures,
    ) -> Option<&'t T> {
        if matches!(self.condition, Condition::DoubleStar) {
            let tail = segments.join("/");
            self.check(&tail, query, transforms, limits, captures)?;
            return self.leaf_handler(has_trailing_slash);
        }

        let (current, remainder) = segments.split_first()?;
        self.check(current, query, transforms, limits, captures)?;

        if remainder.is_empty() {
            return self.leaf_handler(has_trailing_slash);
        }

        self.descend(remainder, query, transforms, limits, has_trailing_slash, captures)
    }

    /// This node's handler, gated on the trailing-slash requirement it was
    /// registered with.
    fn leaf_handler(&self, has_trailing_slash: bool) -> Option<&T> {
        if self.handler_requires_slash && !has_trailing_slash {
            return None;
        }
        self.handler.as_ref()
    }

    /// Tests `text` against this node's condition and params, binding
    /// captures on success.
    fn check(
        &self,
        text: &str,
        query: &[(String, String)],
        transforms: &TransformRegistry,
        limits: &RouteLimits,
        captures: &mut MatchCaptures,
    ) -> Option<()> {
        let condition_ok = match &self.condition {
            Condition::Fixed(s) => s == text,
            Condition::Regex(r) => r.is_match(text),
            Condition::Star | Condition::DoubleStar => true,
        };
        if !condition_ok {
            return None;
        }

        match &self.transform {
            Some(name) => {
                let captured = transforms.apply(name, text)?;
                if let Some(ident) = &self.ident {
                    captures.identities.insert(ident.clone(), captured);
                }
            }
            None => {
                if let Some(ident) = &self.ident {
                    captures
                        .identities
                        .insert(ident.clone(), Captured::Str(text.to_owned()));
                }
            }
        }

        if captures.identities.len() + captures.properties.len() > limits.max_captures {
            return None;
        }

        for clause in &self.params {
            let found = query.iter().find(|(k, _)| k == &clause.name).map(|(_, v)| v.as_str());
            let (name, value) = clause.eval(found, transforms)?;
            if let Some(value) = value {
                captures.properties.insert(name, value);
            }
        }

        Some(())
    }
}

fn component_eq(a: &Condition, b: &Condition) -> bool {
    match (a, b) {
        (Condition::Fixed(x), Condition::Fixed(y)) => x == y,
        (Condition::Regex(x), Condition::Regex(y)) => x.as_str() == y.as_str(),
        (Condition::Star, Condition::Star) => true,
        (Condition::DoubleStar, Condition::DoubleStar) => true,
        _ => false,
    }
}

/// Captures accumulated while descending a [`Trie`].
#[derive(Debug, Default, Clone)]
pub(crate) struct MatchCaptures {
    pub(crate) identities: HashMap<String, Captured>,
    pub(crate) properties: HashMap<String, Captured>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> RouteLimits {
        RouteLimits::default()
    }

    #[test]
    fn fixed_route_matches() {
        let mut trie: Trie<u32> = Trie::new_root();
        trie.insert(Pattern::parse("/items", &limits()).unwrap(), 1);

        let (handler, _) = trie.matches(&["items"], &[], &TransformRegistry::with_builtins(), &limits(), true).unwrap();
        assert_eq!(*handler, 1);
    }

    #[test]
    fn capture_with_transform() {
        let mut trie: Trie<u32> = Trie::new_root();
        trie.insert(Pattern::parse("/items/:id{^[0-9]+$}<Int32>", &limits()).unwrap(), 2);

        let (handler, captures) = trie
            .matches(&["items", "42"], &[], &TransformRegistry::with_builtins(), &limits(), true)
            .unwrap();
        assert_eq!(*handler, 2);
        assert_eq!(captures.identities.get("id"), Some(&Captured::I32(42)));
    }

    #[test]
    fn non_numeric_capture_fails() {
        let mut trie: Trie<u32> = Trie::new_root();
        trie.insert(Pattern::parse("/items/:id{^[0-9]+$}<Int32>", &limits()).unwrap(), 2);

        assert!(trie
            .matches(&["items", "abc"], &[], &TransformRegistry::with_builtins(), &limits(), true)
            .is_none());
    }

    #[test]
    fn fixed_beats_wildcard_regardless_of_order() {
        let mut trie: Trie<&str> = Trie::new_root();
        trie.insert(Pattern::parse("/*", &limits()).unwrap(), "wild");
        trie.insert(Pattern::parse("/users", &limits()).unwrap(), "fixed");

        let (handler, _) = trie
            .matches(&["users"], &[], &TransformRegistry::with_builtins(), &limits(), true)
            .unwrap();
        assert_eq!(*handler, "fixed");
    }

    #[test]
    fn double_star_consumes_remaining_path() {
        let mut trie: Trie<&str> = Trie::new_root();
        trie.insert(Pattern::parse("/assets/:rest{**}", &limits()).unwrap(), "assets");

        let (handler, captures) = trie
            .matches(
                &["assets", "css", "main.css"],
                &[],
                &TransformRegistry::with_builtins(),
                &limits(),
                true,
            )
            .unwrap();
        assert_eq!(*handler, "assets");
        assert_eq!(
            captures.identities.get("rest"),
            Some(&Captured::Str("css/main.css".to_owned()))
        );
    }

    #[test]
    fn double_star_rejected_unless_last() {
        assert_eq!(
            Pattern::parse("/**/users", &limits()),
            Err(ParseError::DoubleStarNotLast)
        );
    }

    #[test]
    fn param_clause_required_and_missing_fails() {
        let mut trie: Trie<&str> = Trie::new_root();
        trie.insert(Pattern::parse("/search{@q: <String>}", &limits()).unwrap(), "search");

        assert!(trie
            .matches(&["search"], &[], &TransformRegistry::with_builtins(), &limits(), true)
            .is_none());

        let query = vec![("q".to_owned(), "rust".to_owned())];
        let (handler, captures) = trie
            .matches(&["search"], &query, &TransformRegistry::with_builtins(), &limits(), true)
            .unwrap();
        assert_eq!(*handler, "search");
        assert_eq!(
            captures.properties.get("q"),
            Some(&Captured::Str("rust".to_owned()))
        );
    }

    #[test]
    fn optional_param_clause_passes_when_absent() {
        let mut trie: Trie<&str> = Trie::new_root();
        trie.insert(Pattern::parse("/list{@?sort: <String>}", &limits()).unwrap(), "list");

        let (handler, captures) = trie
            .matches(&["list"], &[], &TransformRegistry::with_builtins(), &limits(), true)
            .unwrap();
        assert_eq!(*handler, "list");
        assert!(captures.properties.get("sort").is_none());
    }

    #[test]
    fn failed_sibling_does_not_leak_captures_into_winning_match() {
        // The regex-id branch matches "42" but dead-ends one level deeper
        // (no handler under "items/:id/missing" at depth 2); the `*`
        // sibling also matches "42" and does have a handler at depth 2.
        // The dead-end branch must not leave its `id` capture behind.
        let mut trie: Trie<&str> = Trie::new_root();
        trie.insert(
            Pattern::parse("/items/:id{^[0-9]+$}<Int32>/missing", &limits()).unwrap(),
            "deadend",
        );
        trie.insert(Pattern::parse("/items/:any{*}", &limits()).unwrap(), "any");

        let (handler, captures) = trie
            .matches(&["items", "42"], &[], &TransformRegistry::with_builtins(), &limits(), true)
            .unwrap();
        assert_eq!(*handler, "any");
        assert_eq!(
            captures.identities.get("any"),
            Some(&Captured::Str("42".to_owned()))
        );
        assert!(
            captures.identities.get("id").is_none(),
            "failed regex candidate must not leak its capture"
        );
    }

    #[test]
    fn trailing_slash_pattern_parses_flag() {
        assert!(!Pattern::parse("/x", &limits()).unwrap().trailing_slash);
        assert!(Pattern::parse("/x/", &limits()).unwrap().trailing_slash);
        assert!(!Pattern::parse("/", &limits()).unwrap().trailing_slash);
    }

    #[test]
    fn slash_registered_handler_requires_trailing_slash_on_request() {
        let mut trie: Trie<&str> = Trie::new_root();
        trie.insert(Pattern::parse("/x/", &limits()).unwrap(), "dir");

        assert!(trie
            .matches(&["x"], &[], &TransformRegistry::with_builtins(), &limits(), false)
            .is_none());
        let (handler, _) = trie
            .matches(&["x"], &[], &TransformRegistry::with_builtins(), &limits(), true)
            .unwrap();
        assert_eq!(*handler, "dir");
    }

    #[test]
    fn plain_pattern_matches_regardless_of_request_trailing_slash() {
        let mut trie: Trie<&str> = Trie::new_root();
        trie.insert(Pattern::parse("/x", &limits()).unwrap(), "plain");

        assert!(trie
            .matches(&["x"], &[], &TransformRegistry::with_builtins(), &limits(), false)
            .is_some());
        assert!(trie
            .matches(&["x"], &[], &TransformRegistry::with_builtins(), &limits(), true)
            .is_some());
    }

    #[test]
    fn root_path_matches_empty_segments() {
        let mut trie: Trie<&str> = Trie::new_root();
        trie.insert(Pattern::parse("/", &limits()).unwrap(), "root");
        assert!(Pattern::parse("/", &limits()).unwrap().components.is_empty());
        // An empty pattern has no trie children, so it is handled by the
        // caller checking `path_segments().is_empty()` before ever
        // descending into the trie (see `Trie::root_handler`).
    }
}
