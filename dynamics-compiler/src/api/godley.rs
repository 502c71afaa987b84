/*!

Parsing helpers for Godley balance-sheet tables. The heavier lifting — resolving column headers
to stock variables, building flow-variable nodes, and wiring the resulting column into a stock's
integral input — lives on [`crate::api::dag_builder::SystemOfEquations`], since it needs the
builder's cache and variable-resolution machinery; this module owns only the self-contained cell
grammar, grounded in the original `flowCoef.h`/`.cc` referenced by `equations.cc`.

*/

use dynamics_abs::IString;

/// A parsed Godley cell: a signed coefficient and the flow variable name it applies to. A bare
/// name (`"salary"`) has `coef = 1.0`; a leading `-` negates it; an explicit magnitude before a
/// `*` scales it (`"2*interest"`, `"-0.5*tax"`).
#[derive(Clone, Debug, PartialEq)]
pub struct FlowCoef {
  pub coef: f64,
  pub name: IString,
}

impl FlowCoef {
  /// Parses a cell of the form `[+-]?<number>?\*?<name>`. Returns `None` for an empty cell, or
  /// for a cell that is only a number with no name (treated as "no flow").
  pub fn parse(cell: &str) -> Option<FlowCoef> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
      return None;
    }

    let mut chars = trimmed.chars().peekable();
    let mut sign = 1.0_f64;
    match chars.peek() {
      Some('+') => {
        chars.next();
      }
      Some('-') => {
        sign = -1.0;
        chars.next();
      }
      _ => {}
    }

    let mut magnitude = String::new();
    while let Some(&c) = chars.peek() {
      if c.is_ascii_digit() || c == '.' {
        magnitude.push(c);
        chars.next();
      } else {
        break;
      }
    }

    if chars.peek() == Some(&'*') {
      chars.next();
    }

    let name: String = chars.collect::<String>().trim().to_string();
    if name.is_empty() {
      // A bare number (or a bare sign) with no name names no flow; skip it.
      return None;
    }

    let coef = if magnitude.is_empty() {
      sign
    } else {
      sign * magnitude.parse::<f64>().unwrap_or(1.0)
    };

    Some(FlowCoef { coef, name: IString::from(name.as_str()) })
  }
}

/// Strips a trailing "active" marker (`*`) from a Godley column header, then trims whitespace.
/// An asterisk-suffixed header names a column whose stock is freshly computed each step rather
/// than carried over from the previous one; the marker itself plays no further role once the
/// corresponding stock variable has been resolved.
pub fn strip_header_marker(header: &str) -> &str {
  header.trim().trim_end_matches('*').trim()
}

/// `true` for a header that names no column at all (blank, or the underscore convention used to
/// hide a column from the translator).
pub fn is_skippable_header(header: &str) -> bool {
  let trimmed = strip_header_marker(header);
  trimmed.is_empty() || trimmed.starts_with('_')
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bare_name_has_coefficient_one() {
    let flow = FlowCoef::parse("salary").unwrap();
    assert_eq!(flow.coef, 1.0);
    assert_eq!(flow.name.as_ref(), "salary");
  }

  #[test]
  fn leading_minus_negates() {
    let flow = FlowCoef::parse("-tax").unwrap();
    assert_eq!(flow.coef, -1.0);
    assert_eq!(flow.name.as_ref(), "tax");
  }

  #[test]
  fn scaled_flow_parses_magnitude_and_name() {
    let flow = FlowCoef::parse("2*interest").unwrap();
    assert_eq!(flow.coef, 2.0);
    assert_eq!(flow.name.as_ref(), "interest");

    let flow = FlowCoef::parse("-0.5*tax").unwrap();
    assert_eq!(flow.coef, -0.5);
    assert_eq!(flow.name.as_ref(), "tax");
  }

  #[test]
  fn empty_cell_is_none() {
    assert!(FlowCoef::parse("").is_none());
    assert!(FlowCoef::parse("   ").is_none());
  }

  #[test]
  fn bare_number_with_no_name_is_none() {
    assert!(FlowCoef::parse("2*").is_none());
    assert!(FlowCoef::parse("3").is_none());
  }

  #[test]
  fn header_marker_is_stripped() {
    assert_eq!(strip_header_marker("Wages*"), "Wages");
    assert_eq!(strip_header_marker("  Wages  "), "Wages");
  }

  #[test]
  fn skippable_headers() {
    assert!(is_skippable_header(""));
    assert!(is_skippable_header("_hidden"));
    assert!(!is_skippable_header("Wages"));
  }
}
