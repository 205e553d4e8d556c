//! Programs and the 128-slot bank
//!
//! A program is a named container for a serialized parameter snapshot;
//! it stores the text without interpreting the parameters, so browsing a
//! bank never touches the engine. Names are sanitized to printable ASCII
//! (excluding `[`, `\` and `]`), trimmed to 24 characters; the short
//! form fits 8 characters with a `..` ellipsis. A bank holds exactly 128
//! programs plus the current program index; importing a bank file fills
//! the slots from its `[js80p]` sections in order and resets the rest.

use tracing::debug;

use crate::serializer::{self, Line, LINE_END, PROG_NAME_TAG, SECTION_NAME};

pub const NUMBER_OF_PROGRAMS: usize = 128;

pub const NAME_MAX_LENGTH: usize = 24;
pub const SHORT_NAME_MAX_LENGTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    name: String,
    default_name: String,
    body: String,
}

impl Program {
    pub fn new(default_name: &str) -> Self {
        let mut program = Self {
            name: String::new(),
            default_name: sanitize_name(default_name),
            body: String::new(),
        };

        program.update_body(&[]);
        program
    }

    pub fn with_content(name: &str, default_name: &str, params: &str) -> Self {
        let mut program = Self::new(default_name);
        program.set_name(name);

        let lines: Vec<String> = serializer::split_lines(params)
            .filter(|line| !is_structural_line(line))
            .map(|line| line.to_string())
            .collect();

        program.update_body(&lines);
        program
    }

    pub fn get_name(&self) -> &str {
        if self.name.is_empty() {
            &self.default_name
        } else {
            &self.name
        }
    }

    /// The name squeezed into 8 characters, with a `..` ellipsis when it
    /// had to be cut.
    pub fn get_short_name(&self) -> String {
        let name = self.get_name();

        if name.len() <= SHORT_NAME_MAX_LENGTH {
            name.to_string()
        } else {
            format!("{}..", &name[..SHORT_NAME_MAX_LENGTH - 2])
        }
    }

    pub fn set_name(&mut self, new_name: &str) {
        self.name = sanitize_name(new_name);
        let lines = self.param_lines();
        self.update_body(&lines);
    }

    pub fn is_blank(&self) -> bool {
        self.name.is_empty() && self.param_lines().is_empty()
    }

    /// The normalized serialized form: a `[js80p]` header, the NAME line,
    /// and the parameter lines with CRLF endings.
    pub fn serialize(&self) -> &str {
        &self.body
    }

    /// Replace this program with the first `[js80p]` section found in
    /// `serialized` (parameter lines are stored verbatim, normalized to
    /// CRLF).
    pub fn import(&mut self, serialized: &str) {
        let mut in_section = false;
        let mut found = false;
        let mut name = String::new();
        let mut lines: Vec<String> = Vec::new();

        for raw_line in serializer::split_lines(serialized) {
            match serializer::parse_line(raw_line) {
                Ok(Line::Section(section)) => {
                    if in_section {
                        break; // the next section ends this program
                    }

                    in_section = section == SECTION_NAME;
                    found |= in_section;
                }
                Ok(Line::Name(parsed_name)) if in_section => {
                    name = parsed_name;
                }
                Ok(Line::Param { .. }) | Ok(Line::Controller { .. }) if in_section => {
                    lines.push(raw_line.trim().to_string());
                }
                _ => {}
            }
        }

        if !found {
            debug!("no [{}] section found; program reset", SECTION_NAME);
        }

        self.name = sanitize_name(&name);
        self.update_body(&lines);
    }

    fn param_lines(&self) -> Vec<String> {
        serializer::split_lines(&self.body)
            .filter(|line| !is_structural_line(line))
            .map(|line| line.to_string())
            .collect()
    }

    fn update_body(&mut self, lines: &[String]) {
        let mut body = String::with_capacity(64 + lines.iter().map(|l| l.len() + 2).sum::<usize>());

        body.push('[');
        body.push_str(SECTION_NAME);
        body.push(']');
        body.push_str(LINE_END);
        body.push_str(PROG_NAME_TAG);
        body.push_str(" = ");
        body.push_str(self.get_name());
        body.push_str(LINE_END);

        for line in lines {
            body.push_str(line);
            body.push_str(LINE_END);
        }

        self.body = body;
    }
}

fn is_structural_line(line: &str) -> bool {
    matches!(
        serializer::parse_line(line),
        Ok(Line::Section(_)) | Ok(Line::Name(_)) | Ok(Line::Blank)
    )
}

/// Printable ASCII except `[`, `\` and `]`, at most 24 characters,
/// surrounding whitespace trimmed. Idempotent.
pub fn sanitize_name(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .filter(|&character| {
            (' '..='~').contains(&character) && !matches!(character, '[' | '\\' | ']')
        })
        .collect();

    sanitized = sanitized.trim().to_string();

    if sanitized.len() > NAME_MAX_LENGTH {
        sanitized.truncate(NAME_MAX_LENGTH);
        sanitized = sanitized.trim_end().to_string();
    }

    sanitized
}

pub struct Bank {
    programs: Vec<Program>,
    current_program_index: usize,
}

impl Default for Bank {
    fn default() -> Self {
        Self::new()
    }
}

impl Bank {
    pub fn new() -> Self {
        let mut programs: Vec<Program> = (0..NUMBER_OF_PROGRAMS)
            .map(|index| Program::new(&format!("Prog{:03}", index + 1)))
            .collect();

        for (slot, (name, params)) in BUILT_IN_PROGRAMS.iter().enumerate() {
            programs[slot] = Program::with_content(name, &format!("Prog{:03}", slot + 1), params);
        }

        Self {
            programs,
            current_program_index: 0,
        }
    }

    pub fn len(&self) -> usize {
        NUMBER_OF_PROGRAMS
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn program(&self, index: usize) -> &Program {
        &self.programs[index.min(NUMBER_OF_PROGRAMS - 1)]
    }

    pub fn program_mut(&mut self, index: usize) -> &mut Program {
        &mut self.programs[index.min(NUMBER_OF_PROGRAMS - 1)]
    }

    pub fn get_current_program_index(&self) -> usize {
        self.current_program_index
    }

    pub fn set_current_program_index(&mut self, index: usize) {
        self.current_program_index = index.min(NUMBER_OF_PROGRAMS - 1);
    }

    pub fn current_program(&self) -> &Program {
        &self.programs[self.current_program_index]
    }

    pub fn current_program_mut(&mut self) -> &mut Program {
        let index = self.current_program_index;
        &mut self.programs[index]
    }

    /// Import a bank file: up to 128 `[js80p]` sections fill the slots in
    /// order; missing programs reset to blank defaults, extra sections
    /// are ignored.
    pub fn import(&mut self, serialized: &str) {
        let sections = split_sections(serialized);

        debug!(programs = sections.len(), "importing bank");

        for index in 0..NUMBER_OF_PROGRAMS {
            let default_name = format!("Prog{:03}", index + 1);

            match sections.get(index) {
                Some(section) => {
                    self.programs[index] = Program::new(&default_name);
                    self.programs[index].import(section);
                }
                None => {
                    self.programs[index] = Program::new(&default_name);
                }
            }
        }
    }

    pub fn serialize(&self) -> String {
        let mut out = String::with_capacity(
            self.programs.iter().map(|p| p.serialize().len()).sum::<usize>(),
        );

        for program in self.programs.iter() {
            out.push_str(program.serialize());
        }

        out
    }
}

/// Split a bank file into per-program chunks, one per `[js80p]` section.
fn split_sections(serialized: &str) -> Vec<&str> {
    let mut starts: Vec<usize> = Vec::new();
    let mut offset = 0;

    for line in serialized.split_inclusive(['\n']) {
        if let Ok(Line::Section(name)) = serializer::parse_line(line.trim_end_matches(['\r', '\n']))
        {
            if name == SECTION_NAME {
                starts.push(offset);
            }
        }

        offset += line.len();
    }

    let mut sections = Vec::with_capacity(starts.len());

    for (index, &start) in starts.iter().enumerate() {
        let end = starts.get(index + 1).copied().unwrap_or(serialized.len());
        sections.push(&serialized[start..end]);
    }

    sections
}

/// A few factory patches occupying the first slots.
const BUILT_IN_PROGRAMS: &[(&str, &str)] = &[
    (
        "Sine Lead",
        "AMP = 0.800000000000000\r\nVOLctl = 0.582031250000000\r\nN1ATK = 0.002000000000000\r\nN1REL = 0.030000000000000\r\n",
    ),
    (
        "Warm Pad",
        "WAV = 0.111111111111111\r\nAMP = 0.600000000000000\r\nVOLctl = 0.582031250000000\r\nF1LOG = 1.000000000000000\r\nF1FRQ = 0.780000000000000\r\nN1ATK = 0.120000000000000\r\nN1REL = 0.250000000000000\r\nERWET = 0.350000000000000\r\nERDRY = 0.900000000000000\r\n",
    ),
    (
        "Saw Bass",
        "WAV = 0.111111111111111\r\nAMP = 0.850000000000000\r\nSUB = 0.400000000000000\r\nVOLctl = 0.582031250000000\r\nF1LOG = 1.000000000000000\r\nF1FRQ = 0.550000000000000\r\nF1Q = 0.450000000000000\r\nN1ATK = 0.001000000000000\r\nN1DEC = 0.015000000000000\r\nN1SUS = 0.820000000000000\r\nN1REL = 0.020000000000000\r\n",
    ),
    (
        "Chip Square",
        "WAV = 0.777777777777778\r\nAMP = 0.550000000000000\r\nVOLctl = 0.582031250000000\r\nN1ATK = 0.000500000000000\r\nN1DEC = 0.010000000000000\r\nN1SUS = 0.700000000000000\r\nN1REL = 0.012000000000000\r\nEEWET = 0.220000000000000\r\nEEDEL = 0.083000000000000\r\nEEFB = 0.350000000000000\r\n",
    ),
    (
        "Tape Keys",
        "WAV = 0.555555555555556\r\nAMP = 0.700000000000000\r\nVOLctl = 0.582031250000000\r\nN1ATK = 0.004000000000000\r\nN1DEC = 0.060000000000000\r\nN1SUS = 0.500000000000000\r\nN1REL = 0.060000000000000\r\nETWET = 0.600000000000000\r\nETDRY = 0.500000000000000\r\nETSAT = 0.300000000000000\r\nETWFA = 0.150000000000000\r\nETHSS = 0.050000000000000\r\n",
    ),
    (
        "Echo Pluck",
        "WAV = 0.333333333333333\r\nAMP = 0.750000000000000\r\nVOLctl = 0.582031250000000\r\nN1ATK = 0.000800000000000\r\nN1DEC = 0.040000000000000\r\nN1SUS = 0.250000000000000\r\nN1REL = 0.040000000000000\r\nEEWET = 0.400000000000000\r\nEESYN = 1.000000000000000\r\nEEDEL = 0.333333333333333\r\nEEFB = 0.450000000000000\r\nEEWID = 0.800000000000000\r\n",
    ),
    (
        "Unison Saw",
        "WAV = 0.111111111111111\r\nAMP = 0.650000000000000\r\nUNI = 0.666666666666667\r\nUNW = 0.140000000000000\r\nVOLctl = 0.582031250000000\r\nN1ATK = 0.010000000000000\r\nN1REL = 0.080000000000000\r\nECWET = 0.300000000000000\r\nECDPT = 0.250000000000000\r\n",
    ),
    (
        "Noise Riser",
        "AMP = 0.000000000000000\r\nNOI = 0.900000000000000\r\nVOLctl = 0.582031250000000\r\nN1ATK = 0.400000000000000\r\nN1SUS = 1.000000000000000\r\nN1REL = 0.150000000000000\r\nF1FRQ = 0.300000000000000\r\nF1FRQctl = 0.550781250000000\r\nL1FRQ = 0.020000000000000\r\nERWET = 0.300000000000000\r\n",
    ),
];
