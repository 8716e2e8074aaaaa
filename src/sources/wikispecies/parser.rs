//! WsNameParser (C12): a small PEG-style grammar over Wikispecies'
//! wikitext name lines, e.g. `''Canis lupus'' {{a|Linnaeus|L.}}, 1758:
//! Systema Naturae` or `†''Sahelanthropus tchadensis'' [[Brunet]] ''et
//! al''., 2002`. Built from `nom` combinators rather than a generated
//! parser, since that's the project's existing toolkit for this kind
//! of grammar.

use nom::branch::alt;
use nom::bytes::complete::{tag, tag_no_case, take_till1, take_until};
use nom::character::complete::multispace0;
use nom::combinator::opt;
use nom::sequence::delimited;
use nom::IResult;

/// Result of parsing one Wikispecies name line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WsParsed {
    pub canonical: String,
    pub authorship: Option<String>,
    pub reference: Option<String>,
    pub tail: Option<String>,
    pub extinct: bool,
    /// 0 = nothing parsed, 1 = partial (non-empty tail), 2 = good.
    pub quality: u8,
}

const RANK_MARKERS: [&str; 4] = ["var.", "subsp.", "ssp.", "f."];

fn bold_italic(input: &str) -> IResult<&str, &str> {
    delimited(tag("'''"), take_until("'''"), tag("'''"))(input)
}

fn italic(input: &str) -> IResult<&str, &str> {
    delimited(tag("''"), take_until("''"), tag("''"))(input)
}

/// Fallback when the name carries no wiki emphasis markup at all:
/// everything up to the first construct the rest of the grammar cares
/// about (authorship templates, links, a reference colon).
fn bare_name(input: &str) -> IResult<&str, &str> {
    take_till1(|c| matches!(c, '\'' | '{' | '[' | ':'))(input)
}

fn name_span(input: &str) -> IResult<&str, &str> {
    alt((bold_italic, italic, bare_name))(input)
}

/// `var. ''major''` style continuation after the primary name span —
/// the autonym pattern, where an infraspecific epithet trails the
/// binomial inside its own italics (or bare).
fn rank_continuation(input: &str) -> IResult<&str, (&str, &str)> {
    let (input, _) = multispace0(input)?;
    let (input, rank) = alt((
        tag_no_case(RANK_MARKERS[0]),
        tag_no_case(RANK_MARKERS[1]),
        tag_no_case(RANK_MARKERS[2]),
        tag_no_case(RANK_MARKERS[3]),
    ))(input)?;
    let (input, _) = multispace0(input)?;
    let (input, epithet) = alt((italic, bare_name))(input)?;
    Ok((input, (rank, epithet.trim())))
}

/// `{{a|Full|Short}}`, `{{au|Full|Short}}`, `{{aut|Full|Short}}` — the
/// short form wins when present; bare `key=value` parameter tails are
/// dropped rather than mistaken for a positional field.
fn template_authorship(input: &str) -> IResult<&str, String> {
    let (rest, body) = delimited(tag("{{"), take_until("}}"), tag("}}"))(input)?;
    let mut fields = body.split('|');
    let macro_name = fields.next().unwrap_or_default().trim().to_ascii_lowercase();
    if !matches!(macro_name.as_str(), "a" | "au" | "aut") {
        return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag)));
    }
    let positional: Vec<&str> = fields.map(str::trim).filter(|f| !f.contains('=')).collect();
    let chosen = match positional.as_slice() {
        [_full, short, ..] if !short.is_empty() => short,
        [full] => full,
        _ => return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag))),
    };
    Ok((rest, chosen.to_string()))
}

/// `[[Full|Short]]` — a bracket-link author credit.
fn bracket_authorship(input: &str) -> IResult<&str, String> {
    let (rest, body) = delimited(tag("[["), take_until("]]"), tag("]]"))(input)?;
    let chosen = match body.split_once('|') {
        Some((_full, short)) if !short.is_empty() => short,
        _ => body,
    };
    Ok((rest, chosen.to_string()))
}

/// `''et al''.` — italicized with the trailing period kept outside
/// the markup.
fn et_al(input: &str) -> IResult<&str, String> {
    let (rest, _) = tag("''et al''")(input)?;
    let (rest, dot) = opt(tag("."))(rest)?;
    Ok((rest, format!("et al{}", dot.unwrap_or(""))))
}

/// A run of plain, non-markup author text: capitalized words, commas,
/// ampersands, years — anything up to the next recognized construct.
fn bare_author_run(input: &str) -> IResult<&str, String> {
    let (rest, text) = take_till1(|c| matches!(c, '\'' | '{' | '[' | ':' | '('))(input)?;
    if text.trim().is_empty() {
        return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::TakeTill1)));
    }
    Ok((rest, text.trim().to_string()))
}

fn authorship_token(input: &str) -> IResult<&str, String> {
    alt((template_authorship, bracket_authorship, et_al, bare_author_run))(input)
}

/// `(Author, Year)` — original authorship. Whatever immediately
/// follows (up to the reference colon) is a combination author,
/// forming `(Orig) Comb`.
fn parenthesized_original(input: &str) -> IResult<&str, &str> {
    delimited(tag("("), take_until(")"), tag(")"))(input)
}

struct AuthorshipParse {
    authorship: Option<String>,
    rest: String,
}

fn parse_authorship(mut input: &str) -> AuthorshipParse {
    let mut parts: Vec<String> = Vec::new();
    let mut original: Option<String> = None;

    loop {
        input = input.trim_start();
        if input.is_empty() || input.starts_with(':') {
            break;
        }

        if let Ok((rest, orig)) = parenthesized_original(input) {
            original = Some(orig.trim().to_string());
            input = rest;
            continue;
        }

        match authorship_token(input) {
            Ok((rest, token)) if rest.len() < input.len() => {
                parts.push(token);
                input = rest;
            }
            _ => break,
        }
    }

    let combination = if parts.is_empty() {
        None
    } else {
        let mut joined = String::new();
        for part in &parts {
            if !joined.is_empty() && !part.starts_with(',') && !part.starts_with('.') {
                joined.push(' ');
            }
            joined.push_str(part);
        }
        Some(joined)
    };

    let authorship = match (original, combination) {
        (Some(orig), Some(comb)) => Some(format!("({orig}) {comb}")),
        (Some(orig), None) => Some(format!("({orig})")),
        (None, Some(comb)) => Some(comb),
        (None, None) => None,
    };

    AuthorshipParse { authorship, rest: input.to_string() }
}

/// Strips residual `''`, `[[...]]`/`{{...}}` wiki markup from a
/// canonical name or authorship fragment.
fn strip_markup(s: &str) -> String {
    let no_templates = {
        let mut out = String::new();
        let mut depth = 0i32;
        let mut chars = s.chars().peekable();
        while let Some(c) = chars.next() {
            match (c, chars.peek()) {
                ('{', Some('{')) => {
                    chars.next();
                    depth += 1;
                }
                ('}', Some('}')) if depth > 0 => {
                    chars.next();
                    depth -= 1;
                }
                _ if depth == 0 => out.push(c),
                _ => {}
            }
        }
        out
    };
    no_templates.replace("'''", "").replace("''", "").replace("[[", "").replace("]]", "")
}

/// Parses one Wikispecies name line into its canonical name,
/// authorship, trailing reference citation and any leftover tail.
pub fn parse(input: &str) -> WsParsed {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return WsParsed { quality: 0, ..Default::default() };
    }

    let mut rest = trimmed;
    let extinct = rest.starts_with('†');
    if extinct {
        rest = rest.trim_start_matches('†').trim_start();
    }

    let Ok((after_name, first_span)) = name_span(rest) else {
        return WsParsed { quality: 0, extinct, ..Default::default() };
    };

    let mut canonical = first_span.trim().to_string();
    let mut remaining = after_name;
    if let Ok((after_rank, (rank, epithet))) = rank_continuation(remaining) {
        canonical = format!("{canonical} {rank} {epithet}");
        remaining = after_rank;
    }

    let AuthorshipParse { authorship, rest: after_authorship } = parse_authorship(remaining);

    let (reference, tail) = match after_authorship.split_once(':') {
        Some((_, reference_text)) => (Some(reference_text.trim().to_string()), None),
        None => {
            let leftover = after_authorship.trim();
            if leftover.is_empty() {
                (None, None)
            } else {
                (None, Some(leftover.to_string()))
            }
        }
    };

    let quality = if tail.is_some() { 1 } else { 2 };

    let mut canonical = strip_markup(&canonical);
    if extinct {
        canonical = format!("†{canonical}");
    }

    WsParsed {
        canonical,
        authorship: authorship.map(|a| strip_markup(&a)),
        reference,
        tail,
        extinct,
        quality,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_italic_binomial_with_template_authorship() {
        let parsed = parse("''Canis lupus'' {{a|Linnaeus|L.}}, 1758");
        assert_eq!(parsed.canonical, "Canis lupus");
        assert_eq!(parsed.authorship.as_deref(), Some("L., 1758"));
        assert_eq!(parsed.quality, 2);
    }

    #[test]
    fn parses_bracket_link_authorship_with_reference_tail() {
        let parsed = parse("''Sahelanthropus tchadensis'' [[Brunet]], 2002: Nature 418");
        assert_eq!(parsed.canonical, "Sahelanthropus tchadensis");
        assert_eq!(parsed.reference.as_deref(), Some("Nature 418"));
    }

    #[test]
    fn extinct_marker_is_recorded_and_preserved_in_canonical() {
        let parsed = parse("†''Sahelanthropus tchadensis''");
        assert!(parsed.extinct);
        assert_eq!(parsed.canonical, "†Sahelanthropus tchadensis");
    }

    #[test]
    fn original_and_combination_authorship_combine() {
        let parsed = parse("''Rana catesbeiana'' (Shaw, 1802) Baird & Girard");
        assert!(parsed.authorship.as_deref().unwrap().starts_with("(Shaw"));
        assert!(parsed.authorship.as_deref().unwrap().contains("Baird"));
    }

    #[test]
    fn parenthesized_original_authorship_with_bracket_link() {
        let parsed = parse("''Coreura fida'' ([[Hübner]], 1827)");
        assert_eq!(parsed.canonical, "Coreura fida");
        assert_eq!(parsed.authorship.as_deref(), Some("(Hübner, 1827)"));
        assert_eq!(parsed.quality, 2);
    }

    #[test]
    fn extinct_marker_with_bracket_author_and_italicized_et_al() {
        let parsed = parse("†''Sahelanthropus tchadensis'' [[Brunet]] ''et al''., 2002");
        assert_eq!(parsed.canonical, "†Sahelanthropus tchadensis");
        assert_eq!(parsed.authorship.as_deref(), Some("Brunet et al., 2002"));
    }

    #[test]
    fn empty_input_is_unparseable() {
        assert_eq!(parse("   ").quality, 0);
    }

    #[test]
    fn autonym_rank_continuation_is_appended() {
        let parsed = parse("''Parus major'' var. ''major''");
        assert_eq!(parsed.canonical, "Parus major var. major");
    }
}
