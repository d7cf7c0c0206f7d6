//! Restricted JSONPath subset and the structural ops the DSL applies to
//! request/response bodies.
//!
//! Paths are dotted names with optional `[n]` integer indexes or `[*]`
//! star expansion: `$.a.b[0].c`, `$.choices[*].delta`. The leading `$.`
//! is optional.

use serde_json::{Map, Value};

use crate::expr::{Expr, ExprScope};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
    Star,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    segments: Vec<Segment>,
}

impl JsonPath {
    pub fn parse(input: &str) -> Result<Self, String> {
        let trimmed = input.trim();
        let rest = trimmed
            .strip_prefix("$.")
            .or_else(|| trimmed.strip_prefix('$'))
            .unwrap_or(trimmed);
        if rest.is_empty() {
            return Ok(Self {
                segments: Vec::new(),
            });
        }

        let mut segments = Vec::new();
        for part in rest.split('.') {
            if part.is_empty() {
                return Err(format!("empty segment in `{input}`"));
            }
            let mut name = part;
            let mut brackets = Vec::new();
            while let Some(open) = name.rfind('[') {
                let close = name
                    .rfind(']')
                    .ok_or_else(|| format!("unclosed `[` in `{input}`"))?;
                if close != name.len() - 1 || close < open {
                    return Err(format!("malformed index in `{input}`"));
                }
                let idx = &name[open + 1..close];
                if idx == "*" {
                    brackets.push(Segment::Star);
                } else {
                    let n: usize = idx
                        .parse()
                        .map_err(|_| format!("non-integer index `{idx}` in `{input}`"))?;
                    brackets.push(Segment::Index(n));
                }
                name = &name[..open];
            }
            if !name.is_empty() {
                segments.push(Segment::Key(name.to_string()));
            } else if brackets.is_empty() {
                return Err(format!("empty segment in `{input}`"));
            }
            brackets.reverse();
            segments.extend(brackets);
        }
        Ok(Self { segments })
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn has_star(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Star))
    }

    /// All values the path resolves to. Star segments expand over arrays
    /// (and object values); missing segments resolve to nothing.
    pub fn get<'a>(&self, doc: &'a Value) -> Vec<&'a Value> {
        let mut current = vec![doc];
        for segment in &self.segments {
            let mut next = Vec::new();
            for value in current {
                match segment {
                    Segment::Key(name) => {
                        if let Some(child) = value.as_object().and_then(|obj| obj.get(name)) {
                            next.push(child);
                        }
                    }
                    Segment::Index(idx) => {
                        if let Some(child) = value.as_array().and_then(|arr| arr.get(*idx)) {
                            next.push(child);
                        }
                    }
                    Segment::Star => match value {
                        Value::Array(items) => next.extend(items.iter()),
                        Value::Object(map) => next.extend(map.values()),
                        _ => {}
                    },
                }
            }
            current = next;
        }
        current
    }

    pub fn get_one<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        self.get(doc).into_iter().next()
    }

    /// First resolved value rendered as a string (strings unquoted,
    /// everything else JSON-encoded). `None` when the path is absent.
    pub fn get_str(&self, doc: &Value) -> Option<String> {
        self.get_one(doc).map(render_value)
    }

    pub fn get_u64(&self, doc: &Value) -> Option<u64> {
        match self.get_one(doc)? {
            Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Set `value` at every terminal the path names, creating intermediate
    /// objects (and padding arrays) as needed. Star segments fan out over
    /// existing elements only.
    pub fn set(&self, doc: &mut Value, value: Value) {
        if self.is_root() {
            *doc = value;
            return;
        }
        set_walk(doc, &self.segments, &value);
    }

    /// Remove the value(s) the path names from their parent. Absent
    /// parents are a no-op.
    pub fn del(&self, doc: &mut Value) {
        if self.is_root() {
            *doc = Value::Null;
            return;
        }
        del_walk(doc, &self.segments);
    }
}

impl std::fmt::Display for JsonPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "$")?;
        for segment in &self.segments {
            match segment {
                Segment::Key(name) => write!(f, ".{name}")?,
                Segment::Index(idx) => write!(f, "[{idx}]")?,
                Segment::Star => write!(f, "[*]")?,
            }
        }
        Ok(())
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn set_walk(current: &mut Value, segments: &[Segment], value: &Value) {
    let (head, rest) = match segments.split_first() {
        Some(split) => split,
        None => {
            *current = value.clone();
            return;
        }
    };
    match head {
        Segment::Key(name) => {
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            let obj = current.as_object_mut().expect("object ensured above");
            let child = obj.entry(name.clone()).or_insert(Value::Null);
            set_walk(child, rest, value);
        }
        Segment::Index(idx) => {
            if !current.is_array() {
                *current = Value::Array(Vec::new());
            }
            let arr = current.as_array_mut().expect("array ensured above");
            while arr.len() <= *idx {
                arr.push(Value::Null);
            }
            set_walk(&mut arr[*idx], rest, value);
        }
        Segment::Star => match current {
            Value::Array(items) => {
                for item in items {
                    set_walk(item, rest, value);
                }
            }
            Value::Object(map) => {
                for item in map.values_mut() {
                    set_walk(item, rest, value);
                }
            }
            _ => {}
        },
    }
}

fn del_walk(current: &mut Value, segments: &[Segment]) {
    match segments {
        [] => {}
        [Segment::Key(name)] => {
            if let Some(obj) = current.as_object_mut() {
                obj.remove(name);
            }
        }
        [Segment::Index(idx)] => {
            if let Some(arr) = current.as_array_mut()
                && *idx < arr.len()
            {
                arr.remove(*idx);
            }
        }
        [Segment::Star] => match current {
            Value::Array(items) => items.clear(),
            Value::Object(map) => map.clear(),
            _ => {}
        },
        [head, rest @ ..] => match head {
            Segment::Key(name) => {
                if let Some(child) = current.as_object_mut().and_then(|obj| obj.get_mut(name)) {
                    del_walk(child, rest);
                }
            }
            Segment::Index(idx) => {
                if let Some(child) = current.as_array_mut().and_then(|arr| arr.get_mut(*idx)) {
                    del_walk(child, rest);
                }
            }
            Segment::Star => match current {
                Value::Array(items) => {
                    for item in items {
                        del_walk(item, rest);
                    }
                }
                Value::Object(map) => {
                    for item in map.values_mut() {
                        del_walk(item, rest);
                    }
                }
                _ => {}
            },
        },
    }
}

/// One structural mutation over a JSON document, with the value side
/// evaluated per request.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonOp {
    Set { path: JsonPath, value: Expr },
    SetIfAbsent { path: JsonPath, value: Expr },
    Del { path: JsonPath },
    Rename { from: JsonPath, to: JsonPath },
}

impl JsonOp {
    /// Apply against `doc`. `json_rename` with star paths fails the whole
    /// op (leaving the document untouched) when the cardinalities differ.
    pub fn apply(&self, doc: &mut Value, scope: &ExprScope<'_>) {
        match self {
            JsonOp::Set { path, value } => {
                path.set(doc, coerce_value(&value.eval(scope)));
            }
            JsonOp::SetIfAbsent { path, value } => {
                if path.get_one(doc).is_none() {
                    path.set(doc, coerce_value(&value.eval(scope)));
                }
            }
            JsonOp::Del { path } => path.del(doc),
            JsonOp::Rename { from, to } => {
                if from == to {
                    return;
                }
                let sources: Vec<Value> = from.get(doc).into_iter().cloned().collect();
                if sources.is_empty() {
                    return;
                }
                // Star renames must pair one source per target slot; a
                // mismatch fails the whole op with the document untouched.
                if to.has_star() {
                    if count_slots(doc, to.segments()) != sources.len() {
                        return;
                    }
                } else if sources.len() > 1 {
                    return;
                }
                from.del(doc);
                if to.has_star() {
                    // Star targets receive their positional source.
                    set_star_positional(doc, to, sources);
                } else if let Some(first) = sources.into_iter().next() {
                    to.set(doc, first);
                }
            }
        }
    }
}

/// Terminal slots a path fans out to, counting creatable (missing)
/// scalar-key chains as one slot and star segments by their current
/// container size.
fn count_slots(current: &Value, segments: &[Segment]) -> usize {
    let Some((head, rest)) = segments.split_first() else {
        return 1;
    };
    match head {
        Segment::Star => match current {
            Value::Array(items) => items.iter().map(|v| count_slots(v, rest)).sum(),
            Value::Object(map) => map.values().map(|v| count_slots(v, rest)).sum(),
            _ => 0,
        },
        Segment::Key(name) => count_slots(current.get(name).unwrap_or(&Value::Null), rest),
        Segment::Index(idx) => count_slots(
            current
                .as_array()
                .and_then(|arr| arr.get(*idx))
                .unwrap_or(&Value::Null),
            rest,
        ),
    }
}

fn set_star_positional(doc: &mut Value, to: &JsonPath, sources: Vec<Value>) {
    // Collect mutable terminal slots by re-walking; positional pairing with
    // the previously read sources.
    let mut remaining = sources.into_iter();
    set_star_walk(doc, to.segments(), &mut remaining);
}

impl JsonPath {
    fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

fn set_star_walk(
    current: &mut Value,
    segments: &[Segment],
    sources: &mut std::vec::IntoIter<Value>,
) {
    let (head, rest) = match segments.split_first() {
        Some(split) => split,
        None => {
            if let Some(next) = sources.next() {
                *current = next;
            }
            return;
        }
    };
    match head {
        Segment::Key(name) => {
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            let obj = current.as_object_mut().expect("object ensured above");
            let child = obj.entry(name.clone()).or_insert(Value::Null);
            set_star_walk(child, rest, sources);
        }
        Segment::Index(idx) => {
            if !current.is_array() {
                *current = Value::Array(Vec::new());
            }
            let arr = current.as_array_mut().expect("array ensured above");
            while arr.len() <= *idx {
                arr.push(Value::Null);
            }
            set_star_walk(&mut arr[*idx], rest, sources);
        }
        Segment::Star => match current {
            Value::Array(items) => {
                for item in items {
                    set_star_walk(item, rest, sources);
                }
            }
            Value::Object(map) => {
                for item in map.values_mut() {
                    set_star_walk(item, rest, sources);
                }
            }
            _ => {}
        },
    }
}

/// Expression results that are syntactically JSON become JSON values;
/// everything else stays a string.
pub fn coerce_value(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => value,
        Err(_) => Value::String(raw.to_string()),
    }
}
