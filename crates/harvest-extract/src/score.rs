//! Candidate scoring used when a per-source field map is assembled and as a
//! consensus tie-break input.

use harvest_rules::{DataType, FieldRule};

use crate::candidate::Candidate;

/// Score one candidate against its field rule:
/// `10·method_priority + key_path_affinity + numeric_affinity +
/// plausibility_boost`.
#[must_use]
pub fn score_candidate(candidate: &Candidate, rule: Option<&FieldRule>) -> i32 {
    let base = i32::from(candidate.method.priority()) * 10;
    base + key_path_affinity(candidate)
        + numeric_affinity(candidate, rule)
        + plausibility_boost(candidate, rule)
}

fn key_path_affinity(candidate: &Candidate) -> i32 {
    let last = candidate
        .key_path
        .rsplit('.')
        .next()
        .unwrap_or(&candidate.key_path);
    let last = harvest_rules::normalize_field_key(last);
    if last == candidate.field {
        3
    } else if harvest_rules::normalize_field_key(&candidate.key_path).contains(&candidate.field) {
        1
    } else {
        0
    }
}

fn numeric_affinity(candidate: &Candidate, rule: Option<&FieldRule>) -> i32 {
    let Some(rule) = rule else { return 0 };
    if rule.data_type != DataType::Number {
        return 0;
    }
    match parse_leading_number(&candidate.value) {
        Some(_) => 2,
        None => -4,
    }
}

fn plausibility_boost(candidate: &Candidate, rule: Option<&FieldRule>) -> i32 {
    let Some(range) = rule.and_then(|r| r.contract.range) else {
        return 0;
    };
    let Some(number) = parse_leading_number(&candidate.value) else {
        return -6;
    };
    let above_min = range.min.is_none_or(|min| number >= min);
    let below_max = range.max.is_none_or(|max| number <= max);
    if above_min && below_max { 2 } else { -6 }
}

/// Parse the leading numeric token of a value (`"63 g"` → 63.0,
/// `"100-25600"` → 100.0).
#[must_use]
pub fn parse_leading_number(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    let end = trimmed
        .char_indices()
        .take_while(|(i, c)| {
            c.is_ascii_digit() || *c == '.' || (*i == 0 && (*c == '-' || *c == '+'))
        })
        .map(|(i, c)| i + c.len_utf8())
        .last()?;
    trimmed[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Method;
    use harvest_rules::model::{Contract, Range};
    use harvest_rules::normalize::normalize_field_rule;
    use harvest_rules::workbook::RawFieldRow;

    fn weight_rule() -> FieldRule {
        let mut rule = normalize_field_rule(&RawFieldRow {
            key: "weight".into(),
            data_type: Some(DataType::Number),
            ..RawFieldRow::default()
        });
        rule.contract = Contract {
            range: Some(Range {
                min: Some(20.0),
                max: Some(250.0),
            }),
        };
        rule
    }

    fn candidate(method: Method, value: &str, key_path: &str) -> Candidate {
        Candidate {
            field: "weight".into(),
            value: value.into(),
            method,
            key_path: key_path.into(),
            quote: None,
            source_index: 0,
        }
    }

    #[test]
    fn network_json_outscores_dom_for_same_value() {
        let rule = weight_rule();
        let net = score_candidate(
            &candidate(Method::NetworkJson, "63", "specs.weight"),
            Some(&rule),
        );
        let dom = score_candidate(&candidate(Method::Dom, "63", "pattern:0"), Some(&rule));
        assert!(net > dom);
    }

    #[test]
    fn exact_key_path_match_adds_affinity() {
        let rule = weight_rule();
        let exact = score_candidate(
            &candidate(Method::NetworkJson, "63", "product.weight"),
            Some(&rule),
        );
        let vague = score_candidate(
            &candidate(Method::NetworkJson, "63", "product.mass"),
            Some(&rule),
        );
        assert_eq!(exact - vague, 3);
    }

    #[test]
    fn implausible_values_are_penalized() {
        let rule = weight_rule();
        let plausible = score_candidate(&candidate(Method::Dom, "63 g", "p"), Some(&rule));
        let implausible = score_candidate(&candidate(Method::Dom, "6300", "p"), Some(&rule));
        assert_eq!(plausible - implausible, 8); // +2 vs −6
    }

    #[test]
    fn non_numeric_for_number_field_penalized() {
        let rule = weight_rule();
        let s = score_candidate(&candidate(Method::Dom, "lightweight", "p"), Some(&rule));
        // -4 numeric affinity, -6 plausibility
        assert_eq!(s, 20 - 10);
    }

    #[test]
    fn leading_number_parsing() {
        assert_eq!(parse_leading_number("63 g"), Some(63.0));
        assert_eq!(parse_leading_number("100-25600"), Some(100.0));
        assert_eq!(parse_leading_number("-3.5mm"), Some(-3.5));
        assert_eq!(parse_leading_number("HERO"), None);
    }
}
