//! The preset text format
//!
//! Line-oriented, INI-like, case-sensitive UTF-8. Sections are `[name]`
//! on their own line; comments start with `;`; blank lines are ignored;
//! output uses CRLF, input accepts any line ending. Only `[js80p]`
//! sections are consumed. Within a section:
//!
//! ```text
//! NAME = Warm Pad
//! AMP = 0.75
//! VOLctl = 0.58203125      ; controller id 149 / 256
//! ```
//!
//! Parameter names are 1-7 uppercase ASCII letters/digits; the `ctl`
//! suffix assigns a controller source, serialized as `id / 256`. Ratios
//! parse to at most 15 fractional digits and clamp to [0, 1]. Parse
//! errors skip the offending line and never reach the audio thread.
//!
//! Legacy names are upgraded on import: the old `POLY` toggle maps to
//! the note-handling selector, and the old per-envelope `DYN` toggles map
//! to the tri-state update-mode parameters.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1, take_while_m_n},
    character::complete::{char, space0},
    combinator::{eof, opt, recognize},
    sequence::{delimited, pair, preceded},
    IResult,
};
use tracing::{debug, warn};

use crate::synth::{ControllerId, Message, ParamId, Synth};
use crate::Number;

/// Controller ids leave some headroom above the current maximum when
/// encoded as `id / 256`.
pub const CONTROLLER_ID_SCALE: Number = 256.0;

pub const SECTION_NAME: &str = "js80p";
pub const LINE_END: &str = "\r\n";
pub const PROG_NAME_TAG: &str = "NAME";

pub const MAX_SIZE: usize = 256 * 1024;

/// What a single line of a `[js80p]` section means.
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    Blank,
    Section(String),
    Name(String),
    Param { name: String, ratio: Number },
    Controller { name: String, id: u8 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub applied: usize,
    pub skipped: usize,
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

/// Write every parameter (and every controller assignment) of the synth
/// as one `[js80p]` section.
pub fn serialize(synth: &Synth) -> String {
    let mut out = String::with_capacity(16 * 1024);

    out.push('[');
    out.push_str(SECTION_NAME);
    out.push(']');
    out.push_str(LINE_END);

    for index in 0..synth.param_count() {
        let param = ParamId(index as u16);
        let name = synth.param_name(param);

        out.push_str(name);
        out.push_str(" = ");
        out.push_str(&format_ratio(synth.get_param_ratio(param)));
        out.push_str(LINE_END);

        let controller = synth.get_param_controller(param);

        if !controller.is_none() {
            out.push_str(name);
            out.push_str("ctl = ");
            out.push_str(&format_ratio(controller.0 as Number / CONTROLLER_ID_SCALE));
            out.push_str(LINE_END);
        }
    }

    out
}

/// Parse `serialized` and apply it to the synth: reset to defaults, then
/// discrete parameters, then float parameters, then controller
/// assignments, so log-scale toggles land before the ratios they affect.
pub fn import(synth: &mut Synth, serialized: &str) -> ImportSummary {
    let mut summary = ImportSummary::default();
    let mut discrete: Vec<(ParamId, Number)> = Vec::new();
    let mut floats: Vec<(ParamId, Number)> = Vec::new();
    let mut controllers: Vec<(ParamId, ControllerId)> = Vec::new();
    let mut in_section = false;

    let mut text = serialized;

    if text.len() > MAX_SIZE {
        let mut end = MAX_SIZE;

        while !text.is_char_boundary(end) {
            end -= 1;
        }

        text = &text[..end];
    }

    for raw_line in split_lines(text) {
        match parse_line(raw_line) {
            Ok(Line::Blank) | Ok(Line::Name(_)) => {}
            Ok(Line::Section(name)) => {
                in_section = name == SECTION_NAME;
            }
            Ok(Line::Param { name, ratio }) => {
                if !in_section {
                    continue;
                }

                let (name, ratio) = upgrade_line(&name, ratio);

                match synth.param_id_by_name(&name) {
                    Some(param) => {
                        let slot = if synth.param_kind(param).is_discrete() {
                            &mut discrete
                        } else {
                            &mut floats
                        };

                        slot.push((param, ratio.clamp(0.0, 1.0)));
                        summary.applied += 1;
                    }
                    None => {
                        debug!(param = %name, "unknown parameter skipped");
                        summary.skipped += 1;
                    }
                }
            }
            Ok(Line::Controller { name, id }) => {
                if !in_section {
                    continue;
                }

                let (name, _) = upgrade_line(&name, 0.0);
                let controller = ControllerId(id);

                match synth.param_id_by_name(&name) {
                    Some(param) if controller.is_valid() => {
                        controllers.push((param, controller));
                        summary.applied += 1;
                    }
                    _ => {
                        debug!(param = %name, id, "invalid controller assignment skipped");
                        summary.skipped += 1;
                    }
                }
            }
            Err(()) => {
                if in_section {
                    warn!(line = %raw_line, "unparseable preset line skipped");
                    summary.skipped += 1;
                }
            }
        }
    }

    synth.process_message(Message::Clear);

    for (param, ratio) in discrete {
        synth.process_message(Message::SetParam { param, ratio });
    }

    for (param, ratio) in floats {
        synth.process_message(Message::SetParam { param, ratio });
    }

    for (param, controller) in controllers {
        synth.process_message(Message::AssignController { param, controller });
    }

    summary
}

/// Upgrade parameter names from older preset versions:
/// `POLY` (toggle) became the `NH` note-handling selector, and the
/// per-envelope `N?DYN` toggles became the tri-state `N?UPD` modes.
pub fn upgrade_line(name: &str, ratio: Number) -> (String, Number) {
    if name == "POLY" {
        return ("NH".to_string(), upgrade_old_note_handling_ratio(ratio));
    }

    if let Some(prefix) = name.strip_suffix("DYN") {
        if prefix.len() == 2 && prefix.starts_with('N') {
            return (
                format!("{}UPD", prefix),
                upgrade_old_envelope_update_mode_ratio(ratio),
            );
        }
    }

    (name.to_string(), ratio)
}

/// Old `POLY` off meant monophonic, on meant polyphonic; the hold
/// variants only exist post-upgrade.
fn upgrade_old_note_handling_ratio(ratio: Number) -> Number {
    if ratio < 0.5 {
        0.0 // Monophonic
    } else {
        2.0 / 3.0 // Polyphonic
    }
}

/// Old `DYN` off meant a static snapshot, on meant fully dynamic; the
/// end-of-segment mode only exists post-upgrade.
fn upgrade_old_envelope_update_mode_ratio(ratio: Number) -> Number {
    if ratio < 0.5 {
        0.0
    } else {
        1.0
    }
}

pub fn format_ratio(ratio: Number) -> String {
    format!("{:.15}", ratio)
}

/// Split on any of `\n`, `\r`, `\r\n`.
pub fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split(['\n', '\r']).filter(|line| !line.is_empty())
}

// ---------------------------------------------------------------------------
// Line parsing
// ---------------------------------------------------------------------------

fn is_param_name_char(character: char) -> bool {
    character.is_ascii_uppercase() || character.is_ascii_digit()
}

fn is_section_name_char(character: char) -> bool {
    character.is_ascii_lowercase() || character.is_ascii_digit() || character == '_'
}

fn comment(input: &str) -> IResult<&str, &str> {
    recognize(pair(char(';'), nom::bytes::complete::take_while(|_| true)))(input)
}

fn line_tail(input: &str) -> IResult<&str, ()> {
    let (input, _) = space0(input)?;
    let (input, _) = opt(comment)(input)?;
    let (input, _) = eof(input)?;
    Ok((input, ()))
}

fn section_line(input: &str) -> IResult<&str, Line> {
    let (input, name) = delimited(
        char('['),
        take_while1(is_section_name_char),
        char(']'),
    )(input)?;
    let (input, _) = line_tail(input)?;

    Ok((input, Line::Section(name.to_string())))
}

fn name_line(input: &str) -> IResult<&str, Line> {
    let (input, _) = tag(PROG_NAME_TAG)(input)?;
    let (input, _) = space0(input)?;
    let (input, _) = char('=')(input)?;
    let (input, _) = space0(input)?;

    // The rest of the line (minus a trailing comment) is the name.
    let name = match input.split_once(';') {
        Some((name, _)) => name,
        None => input,
    };

    Ok(("", Line::Name(name.trim_end().to_string())))
}

fn number(input: &str) -> IResult<&str, Number> {
    let (input, text) = recognize(pair(
        take_while1(|character: char| character.is_ascii_digit()),
        opt(preceded(
            char('.'),
            take_while_m_n(1, 15, |character: char| character.is_ascii_digit()),
        )),
    ))(input)?;

    match text.parse::<Number>() {
        Ok(value) => Ok((input, value)),
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Float,
        ))),
    }
}

fn assignment_line(input: &str) -> IResult<&str, Line> {
    let (input, name) = take_while_m_n(1, 7, is_param_name_char)(input)?;
    let (input, suffix) = opt(tag("ctl"))(input)?;
    let (input, _) = space0(input)?;
    let (input, _) = char('=')(input)?;
    let (input, _) = space0(input)?;
    let (input, value) = number(input)?;
    let (input, _) = line_tail(input)?;

    let line = match suffix {
        Some(_) => Line::Controller {
            name: name.to_string(),
            id: (value * CONTROLLER_ID_SCALE).round().clamp(0.0, 255.0) as u8,
        },
        None => Line::Param {
            name: name.to_string(),
            ratio: value,
        },
    };

    Ok((input, line))
}

fn blank_line(input: &str) -> IResult<&str, Line> {
    let (input, _) = line_tail(input)?;
    Ok((input, Line::Blank))
}

/// Classify one line; `Err(())` marks a malformed line the caller should
/// skip.
pub fn parse_line(line: &str) -> Result<Line, ()> {
    let trimmed = line.trim_start();

    match alt((section_line, name_line, assignment_line, blank_line))(trimmed) {
        Ok((_, parsed)) => Ok(parsed),
        Err(_) => Err(()),
    }
}
