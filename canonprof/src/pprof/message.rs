//! The `perftools.profiles` message schema.
//!
//! Each message decodes from and encodes to its wire representation.
//! Repeated scalars are written packed and accepted packed or unpacked;
//! unknown fields are skipped.

use super::wire::{Reader, Result, WireType, Writer, expect_wire_type};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Profile {
    pub sample_type: Vec<ValueType>,
    pub sample: Vec<Sample>,
    pub mapping: Vec<Mapping>,
    pub location: Vec<Location>,
    pub function: Vec<Function>,
    /// Index 0 is always the empty string in well-formed profiles.
    pub string_table: Vec<String>,
    pub drop_frames: i64,
    pub keep_frames: i64,
    pub time_nanos: i64,
    pub duration_nanos: i64,
    pub period_type: Option<ValueType>,
    pub period: i64,
    pub comment: Vec<i64>,
    pub default_sample_type: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValueType {
    pub r#type: i64,
    pub unit: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sample {
    /// Leaf first.
    pub location_id: Vec<u64>,
    pub value: Vec<i64>,
    pub label: Vec<Label>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Label {
    pub key: i64,
    pub str: i64,
    pub num: i64,
    pub num_unit: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Mapping {
    pub id: u64,
    pub memory_start: u64,
    pub memory_limit: u64,
    pub file_offset: u64,
    pub filename: i64,
    pub build_id: i64,
    pub has_functions: bool,
    pub has_filenames: bool,
    pub has_line_numbers: bool,
    pub has_inline_frames: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Location {
    pub id: u64,
    pub mapping_id: u64,
    pub address: u64,
    /// Innermost inlined function first.
    pub line: Vec<Line>,
    pub is_folded: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Line {
    pub function_id: u64,
    pub line: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Function {
    pub id: u64,
    pub name: i64,
    pub system_name: i64,
    pub filename: i64,
    pub start_line: i64,
}

/// Walk every field of `buf`, handing each tag to `on_field`.
fn decode_fields<'a>(
    buf: &'a [u8],
    mut on_field: impl FnMut(&mut Reader<'a>, u32, WireType) -> Result<bool>,
) -> Result<()> {
    let mut reader = Reader::new(buf);
    while !reader.is_at_end() {
        let (field, wire_type) = reader.read_tag()?;
        if !on_field(&mut reader, field, wire_type)? {
            reader.skip(wire_type)?;
        }
    }
    Ok(())
}

fn varint(reader: &mut Reader<'_>, field: u32, wire_type: WireType) -> Result<u64> {
    expect_wire_type(field, wire_type, WireType::Varint)?;
    reader.read_varint()
}

fn message<'a>(reader: &mut Reader<'a>, field: u32, wire_type: WireType) -> Result<&'a [u8]> {
    expect_wire_type(field, wire_type, WireType::LengthDelimited)?;
    reader.read_bytes()
}

impl Profile {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut profile = Profile::default();
        let mut comments = Vec::new();
        decode_fields(buf, |r, field, wt| {
            match field {
                1 => profile.sample_type.push(ValueType::decode(message(r, field, wt)?)?),
                2 => profile.sample.push(Sample::decode(message(r, field, wt)?)?),
                3 => profile.mapping.push(Mapping::decode(message(r, field, wt)?)?),
                4 => profile.location.push(Location::decode(message(r, field, wt)?)?),
                5 => profile.function.push(Function::decode(message(r, field, wt)?)?),
                6 => {
                    expect_wire_type(field, wt, WireType::LengthDelimited)?;
                    profile.string_table.push(r.read_string()?.to_string());
                }
                7 => profile.drop_frames = varint(r, field, wt)? as i64,
                8 => profile.keep_frames = varint(r, field, wt)? as i64,
                9 => profile.time_nanos = varint(r, field, wt)? as i64,
                10 => profile.duration_nanos = varint(r, field, wt)? as i64,
                11 => profile.period_type = Some(ValueType::decode(message(r, field, wt)?)?),
                12 => profile.period = varint(r, field, wt)? as i64,
                13 => r.read_repeated_varint(field, wt, &mut comments)?,
                14 => profile.default_sample_type = varint(r, field, wt)? as i64,
                _ => return Ok(false),
            }
            Ok(true)
        })?;
        profile.comment = comments.into_iter().map(|c| c as i64).collect();
        Ok(profile)
    }

    /// Decode `buf` only if it looks like a real profile: it must decode
    /// cleanly and carry a string table starting with the empty string.
    pub fn decode_probe(buf: &[u8]) -> Option<Self> {
        let profile = match Profile::decode(buf) {
            Ok(profile) => profile,
            Err(e) => {
                log::debug!("not a pprof profile: {e}");
                return None;
            }
        };
        match profile.string_table.first() {
            Some(first) if first.is_empty() => Some(profile),
            _ => None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        for value_type in &self.sample_type {
            w.write_bytes(1, &value_type.encode());
        }
        for sample in &self.sample {
            w.write_bytes(2, &sample.encode());
        }
        for mapping in &self.mapping {
            w.write_bytes(3, &mapping.encode());
        }
        for location in &self.location {
            w.write_bytes(4, &location.encode());
        }
        for function in &self.function {
            w.write_bytes(5, &function.encode());
        }
        for s in &self.string_table {
            w.write_string(6, s);
        }
        w.write_int64(7, self.drop_frames);
        w.write_int64(8, self.keep_frames);
        w.write_int64(9, self.time_nanos);
        w.write_int64(10, self.duration_nanos);
        if let Some(period_type) = &self.period_type {
            w.write_bytes(11, &period_type.encode());
        }
        w.write_int64(12, self.period);
        w.write_packed_varints(13, self.comment.iter().map(|&c| c as u64));
        w.write_int64(14, self.default_sample_type);
        w.into_bytes()
    }

    /// Look up a string table entry; out of range indices read as "".
    pub fn string(&self, index: i64) -> &str {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.string_table.get(i))
            .map(String::as_str)
            .unwrap_or("")
    }
}

impl ValueType {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut value_type = ValueType::default();
        decode_fields(buf, |r, field, wt| {
            match field {
                1 => value_type.r#type = varint(r, field, wt)? as i64,
                2 => value_type.unit = varint(r, field, wt)? as i64,
                _ => return Ok(false),
            }
            Ok(true)
        })?;
        Ok(value_type)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_int64(1, self.r#type);
        w.write_int64(2, self.unit);
        w.into_bytes()
    }
}

impl Sample {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut sample = Sample::default();
        let mut values = Vec::new();
        decode_fields(buf, |r, field, wt| {
            match field {
                1 => r.read_repeated_varint(field, wt, &mut sample.location_id)?,
                2 => r.read_repeated_varint(field, wt, &mut values)?,
                3 => sample.label.push(Label::decode(message(r, field, wt)?)?),
                _ => return Ok(false),
            }
            Ok(true)
        })?;
        sample.value = values.into_iter().map(|v| v as i64).collect();
        Ok(sample)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_packed_varints(1, self.location_id.iter().copied());
        w.write_packed_varints(2, self.value.iter().map(|&v| v as u64));
        for label in &self.label {
            w.write_bytes(3, &label.encode());
        }
        w.into_bytes()
    }
}

impl Label {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut label = Label::default();
        decode_fields(buf, |r, field, wt| {
            match field {
                1 => label.key = varint(r, field, wt)? as i64,
                2 => label.str = varint(r, field, wt)? as i64,
                3 => label.num = varint(r, field, wt)? as i64,
                4 => label.num_unit = varint(r, field, wt)? as i64,
                _ => return Ok(false),
            }
            Ok(true)
        })?;
        Ok(label)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_int64(1, self.key);
        w.write_int64(2, self.str);
        w.write_int64(3, self.num);
        w.write_int64(4, self.num_unit);
        w.into_bytes()
    }
}

impl Mapping {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut mapping = Mapping::default();
        decode_fields(buf, |r, field, wt| {
            match field {
                1 => mapping.id = varint(r, field, wt)?,
                2 => mapping.memory_start = varint(r, field, wt)?,
                3 => mapping.memory_limit = varint(r, field, wt)?,
                4 => mapping.file_offset = varint(r, field, wt)?,
                5 => mapping.filename = varint(r, field, wt)? as i64,
                6 => mapping.build_id = varint(r, field, wt)? as i64,
                7 => mapping.has_functions = varint(r, field, wt)? != 0,
                8 => mapping.has_filenames = varint(r, field, wt)? != 0,
                9 => mapping.has_line_numbers = varint(r, field, wt)? != 0,
                10 => mapping.has_inline_frames = varint(r, field, wt)? != 0,
                _ => return Ok(false),
            }
            Ok(true)
        })?;
        Ok(mapping)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_uint64(1, self.id);
        w.write_uint64(2, self.memory_start);
        w.write_uint64(3, self.memory_limit);
        w.write_uint64(4, self.file_offset);
        w.write_int64(5, self.filename);
        w.write_int64(6, self.build_id);
        w.write_bool(7, self.has_functions);
        w.write_bool(8, self.has_filenames);
        w.write_bool(9, self.has_line_numbers);
        w.write_bool(10, self.has_inline_frames);
        w.into_bytes()
    }
}

impl Location {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut location = Location::default();
        decode_fields(buf, |r, field, wt| {
            match field {
                1 => location.id = varint(r, field, wt)?,
                2 => location.mapping_id = varint(r, field, wt)?,
                3 => location.address = varint(r, field, wt)?,
                4 => location.line.push(Line::decode(message(r, field, wt)?)?),
                5 => location.is_folded = varint(r, field, wt)? != 0,
                _ => return Ok(false),
            }
            Ok(true)
        })?;
        Ok(location)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_uint64(1, self.id);
        w.write_uint64(2, self.mapping_id);
        w.write_uint64(3, self.address);
        for line in &self.line {
            w.write_bytes(4, &line.encode());
        }
        w.write_bool(5, self.is_folded);
        w.into_bytes()
    }
}

impl Line {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut line = Line::default();
        decode_fields(buf, |r, field, wt| {
            match field {
                1 => line.function_id = varint(r, field, wt)?,
                2 => line.line = varint(r, field, wt)? as i64,
                _ => return Ok(false),
            }
            Ok(true)
        })?;
        Ok(line)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_uint64(1, self.function_id);
        w.write_int64(2, self.line);
        w.into_bytes()
    }
}

impl Function {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut function = Function::default();
        decode_fields(buf, |r, field, wt| {
            match field {
                1 => function.id = varint(r, field, wt)?,
                2 => function.name = varint(r, field, wt)? as i64,
                3 => function.system_name = varint(r, field, wt)? as i64,
                4 => function.filename = varint(r, field, wt)? as i64,
                5 => function.start_line = varint(r, field, wt)? as i64,
                _ => return Ok(false),
            }
            Ok(true)
        })?;
        Ok(function)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_uint64(1, self.id);
        w.write_int64(2, self.name);
        w.write_int64(3, self.system_name);
        w.write_int64(4, self.filename);
        w.write_int64(5, self.start_line);
        w.into_bytes()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pprof::wire::DecodeError;

    /// A two-function CPU profile: `main -> work` sampled twice, `main` once.
    pub(crate) fn sample_profile() -> Profile {
        let strings = ["", "cpu", "nanoseconds", "main", "work", "app.go", "/bin/app"];
        Profile {
            sample_type: vec![ValueType { r#type: 1, unit: 2 }],
            sample: vec![
                Sample {
                    location_id: vec![2, 1],
                    value: vec![10],
                    label: vec![],
                },
                Sample {
                    location_id: vec![2, 1],
                    value: vec![20],
                    label: vec![],
                },
                Sample {
                    location_id: vec![1],
                    value: vec![5],
                    label: vec![Label {
                        key: 1,
                        num: 3,
                        ..Label::default()
                    }],
                },
            ],
            mapping: vec![Mapping {
                id: 1,
                memory_start: 0x400000,
                memory_limit: 0x500000,
                filename: 6,
                has_functions: true,
                ..Mapping::default()
            }],
            location: vec![
                Location {
                    id: 1,
                    mapping_id: 1,
                    address: 0x401000,
                    line: vec![Line {
                        function_id: 1,
                        line: 12,
                    }],
                    is_folded: false,
                },
                Location {
                    id: 2,
                    mapping_id: 1,
                    address: 0x402000,
                    line: vec![Line {
                        function_id: 2,
                        line: 30,
                    }],
                    is_folded: false,
                },
            ],
            function: vec![
                Function {
                    id: 1,
                    name: 3,
                    system_name: 3,
                    filename: 5,
                    start_line: 10,
                },
                Function {
                    id: 2,
                    name: 4,
                    system_name: 4,
                    filename: 5,
                    start_line: 28,
                },
            ],
            string_table: strings.iter().map(|s| s.to_string()).collect(),
            duration_nanos: 35,
            period_type: Some(ValueType { r#type: 1, unit: 2 }),
            period: 10_000_000,
            ..Profile::default()
        }
    }

    #[test]
    fn profile_round_trip() {
        let profile = sample_profile();
        let decoded = Profile::decode(&profile.encode()).unwrap();
        assert_eq!(decoded, profile);
    }

    #[test]
    fn wide_values_round_trip() {
        let mut profile = sample_profile();
        profile.time_nanos = i64::MAX - 7;
        profile.drop_frames = -1;
        profile.comment = vec![];
        profile.mapping[0].memory_limit = u64::MAX;
        profile.location[0].address = (1u64 << 53) + 1;
        profile.sample[0].value = vec![(1i64 << 60) + 3, -5, 0];
        profile.sample[1].location_id = vec![];
        profile.sample[2].location_id = vec![u64::MAX];

        let decoded = Profile::decode(&profile.encode()).unwrap();
        assert_eq!(decoded, profile);
    }

    #[test]
    fn unpacked_values_are_accepted() {
        let mut w = Writer::new();
        w.write_uint64(1, 4);
        w.write_uint64(1, 3);
        w.write_int64(2, 100);
        let sample = Sample::decode(&w.into_bytes()).unwrap();
        assert_eq!(sample.location_id, vec![4, 3]);
        assert_eq!(sample.value, vec![100]);
    }

    #[test]
    fn unknown_fields_are_skipped() {
        let mut w = Writer::new();
        w.write_uint64(1, 9);
        w.write_string(42, "future extension");
        w.write_uint64(5, 77);
        let function = Function::decode(&w.into_bytes()).unwrap();
        assert_eq!(function.id, 9);
        assert_eq!(function.start_line, 77);
    }

    #[test]
    fn wrong_wire_type_for_known_field_is_an_error() {
        let mut w = Writer::new();
        w.write_uint64(6, 1);
        assert_eq!(
            Profile::decode(&w.into_bytes()),
            Err(DecodeError::UnexpectedWireType {
                field: 6,
                wire_type: WireType::Varint
            })
        );
    }

    #[test]
    fn probe_rejects_text_and_truncation() {
        assert!(Profile::decode_probe(b"").is_none());
        assert!(Profile::decode_probe(b"{\"traceEvents\": []}").is_none());
        assert!(Profile::decode_probe(b"main;work 10\nmain 5\n").is_none());

        let bytes = sample_profile().encode();
        assert!(Profile::decode_probe(&bytes).is_some());
        assert!(Profile::decode_probe(&bytes[..bytes.len() - 3]).is_none());
    }

    #[test]
    fn string_lookup_is_total() {
        let profile = sample_profile();
        assert_eq!(profile.string(3), "main");
        assert_eq!(profile.string(-1), "");
        assert_eq!(profile.string(1000), "");
    }
}
