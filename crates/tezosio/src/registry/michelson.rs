//! Walking Michelson types and values side by side to find annotated fields.

use serde_json::Value;

fn prim(node: &Value) -> Option<&str> {
    node.get("prim").and_then(Value::as_str)
}

fn args(node: &Value) -> &[Value] {
    node.get("args")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn has_annot(ty: &Value, annot: &str) -> bool {
    ty.get("annots")
        .and_then(Value::as_array)
        .map(|annots| {
            annots
                .iter()
                .filter_map(Value::as_str)
                .any(|a| a.strip_prefix('%') == Some(annot))
        })
        .unwrap_or(false)
}

/// Flattens a right comb of pair types.
fn comb_types(ty: &Value) -> Vec<&Value> {
    let mut out = Vec::new();
    let mut cur = ty;
    loop {
        let a = args(cur);
        match a.split_last() {
            Some((last, init)) if prim(cur) == Some("pair") => {
                out.extend(init.iter());
                if prim(last) == Some("pair") && last.get("annots").is_none() {
                    cur = last;
                } else {
                    out.push(last);
                    return out;
                }
            }
            _ => {
                out.push(cur);
                return out;
            }
        }
    }
}

/// Components of a pair value, as `Pair` nodes or sequences.
fn pair_components(val: &Value) -> Option<&[Value]> {
    match val {
        Value::Array(items) => Some(items.as_slice()),
        _ if prim(val) == Some("Pair") => Some(args(val)),
        _ => None,
    }
}

/// Expands a pair value to exactly `n` components, unfolding the right comb
/// as needed.
fn comb_values(val: &Value, n: usize) -> Option<Vec<&Value>> {
    let mut out = Vec::with_capacity(n);
    let mut cur = val;
    loop {
        let comps = pair_components(cur)?;
        let remaining = n - out.len();
        if comps.len() > remaining || comps.len() < 2 {
            return None;
        }
        if comps.len() == remaining {
            out.extend(comps.iter());
            return Some(out);
        }
        let (last, init) = comps.split_last()?;
        out.extend(init.iter());
        cur = last;
    }
}

/// Finds the value whose type carries `%annot`, returning it with its type.
pub(crate) fn find_annotated<'a>(
    ty: &'a Value,
    val: &'a Value,
    annot: &str,
) -> Option<(&'a Value, &'a Value)> {
    if has_annot(ty, annot) {
        return Some((ty, val));
    }
    if prim(ty) != Some("pair") {
        return None;
    }

    let types = comb_types(ty);
    let values = comb_values(val, types.len())?;
    types
        .into_iter()
        .zip(values)
        .find_map(|(t, v)| find_annotated(t, v, annot))
}

/// Reads a `string`, or `bytes` holding UTF-8, out of a value node.
pub(crate) fn as_text(val: &Value) -> Option<String> {
    if let Some(s) = val.get("string").and_then(Value::as_str) {
        return Some(s.to_owned());
    }
    let bytes = val.get("bytes").and_then(Value::as_str)?;
    String::from_utf8(hex::decode(bytes).ok()?).ok()
}
