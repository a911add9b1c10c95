//! Import of binary pprof profiles.
//!
//! [`wire`] and [`message`] form a dependency-free codec for the
//! `perftools.profiles` schema; this module maps a decoded [`message::Profile`]
//! onto the canonical model.

pub mod message;
pub mod wire;

use crate::Result;
use canonprof_model::{FrameInfo, ProfileBuilder, ProfileGroup, ValueUnit};
use message::{Function, Location, Mapping};
use std::collections::HashMap;

/// Index of the sample value to import: `default_sample_type` when it names
/// one of the sample types, otherwise the last.
fn sample_type_index(profile: &message::Profile) -> Option<usize> {
    if profile.sample_type.is_empty() {
        return None;
    }
    if profile.default_sample_type != 0 {
        if let Some(index) = profile
            .sample_type
            .iter()
            .position(|vt| vt.r#type == profile.default_sample_type)
        {
            return Some(index);
        }
    }
    Some(profile.sample_type.len() - 1)
}

struct Symbolizer<'a> {
    profile: &'a message::Profile,
    locations: HashMap<u64, &'a Location>,
    functions: HashMap<u64, &'a Function>,
    mappings: HashMap<u64, &'a Mapping>,
    cache: HashMap<u64, Vec<FrameInfo>>,
}

impl<'a> Symbolizer<'a> {
    fn new(profile: &'a message::Profile) -> Self {
        Self {
            profile,
            locations: profile.location.iter().map(|l| (l.id, l)).collect(),
            functions: profile.function.iter().map(|f| (f.id, f)).collect(),
            mappings: profile.mapping.iter().map(|m| (m.id, m)).collect(),
            cache: HashMap::new(),
        }
    }

    /// Frames for a location, innermost inlined function first.
    fn frames_for_location(&mut self, id: u64) -> &[FrameInfo] {
        if !self.cache.contains_key(&id) {
            let frames = self.symbolize(id);
            self.cache.insert(id, frames);
        }
        self.cache.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn symbolize(&self, id: u64) -> Vec<FrameInfo> {
        let Some(location) = self.locations.get(&id) else {
            return Vec::new();
        };
        let mut frames = Vec::with_capacity(location.line.len().max(1));
        for line in &location.line {
            let Some(function) = self.functions.get(&line.function_id) else {
                continue;
            };
            let mut name = self.profile.string(function.name);
            if name.is_empty() {
                name = self.profile.string(function.system_name);
            }
            if name.is_empty() {
                continue;
            }
            let mut frame =
                FrameInfo::new(name).with_optional_file(Some(self.profile.string(function.filename)));
            if function.start_line > 0 {
                frame.line = u32::try_from(function.start_line).ok();
            }
            frames.push(frame);
        }
        if frames.is_empty() {
            let file = self
                .mappings
                .get(&location.mapping_id)
                .map(|m| self.profile.string(m.filename));
            frames.push(FrameInfo::new(format!("0x{:x}", location.address)).with_optional_file(file));
        }
        frames
    }
}

/// Convert a decoded profile. `Ok(None)` when it declares no sample types.
pub fn import(profile: &message::Profile) -> Result<Option<ProfileGroup>> {
    let Some(value_index) = sample_type_index(profile) else {
        return Ok(None);
    };
    let sample_type = profile.sample_type[value_index];

    let mut builder = ProfileBuilder::new();
    builder.set_unit(ValueUnit::from_name(profile.string(sample_type.unit)));

    let mut symbolizer = Symbolizer::new(profile);
    let mut stack: Vec<FrameInfo> = Vec::new();
    for sample in &profile.sample {
        let Some(&value) = sample.value.get(value_index) else {
            continue;
        };
        stack.clear();
        for &location_id in &sample.location_id {
            stack.extend_from_slice(symbolizer.frames_for_location(location_id));
        }
        // Leaf first on the wire.
        stack.reverse();
        builder.append_sample_with_weight(&stack, value as f64)?;
    }

    log::debug!(
        "pprof: {} samples of type '{}'",
        builder.sample_count(),
        profile.string(sample_type.r#type)
    );
    Ok(Some(ProfileGroup::from_profile(builder.build())))
}

#[cfg(test)]
mod tests {
    use super::message::tests::sample_profile;
    use super::message::{Line, ValueType};
    use super::*;

    #[test]
    fn imports_cpu_profile() {
        let group = import(&sample_profile()).unwrap().unwrap();
        let profile = group.default_profile();

        assert_eq!(profile.unit(), ValueUnit::Nanoseconds);
        assert_eq!(profile.total_weight(), 35.0);

        let main = profile.frame_by_name("main").unwrap();
        assert_eq!((main.self_weight(), main.total_weight()), (5.0, 35.0));
        assert_eq!(main.file(), Some("app.go"));
        assert_eq!(main.line(), Some(10));

        let work = profile.frame_by_name("work").unwrap();
        assert_eq!((work.self_weight(), work.total_weight()), (30.0, 30.0));
    }

    #[test]
    fn default_sample_type_selects_value() {
        let mut profile = sample_profile();
        profile.string_table.extend(["samples".to_string(), "count".to_string()]);
        profile.sample_type = vec![
            ValueType { r#type: 7, unit: 8 },
            ValueType { r#type: 1, unit: 2 },
        ];
        for sample in &mut profile.sample {
            sample.value = vec![1, sample.value[0]];
        }

        // Without a default the last type (cpu) is used.
        let group = import(&profile).unwrap().unwrap();
        assert_eq!(group.default_profile().total_weight(), 35.0);

        profile.default_sample_type = 7;
        let group = import(&profile).unwrap().unwrap();
        assert_eq!(group.default_profile().total_weight(), 3.0);
        assert_eq!(group.default_profile().unit(), ValueUnit::None);
    }

    #[test]
    fn inline_frames_expand_innermost_first() {
        let mut profile = sample_profile();
        // Location 2 is `work` inlined into `main`.
        profile.location[1].line = vec![
            Line {
                function_id: 2,
                line: 30,
            },
            Line {
                function_id: 1,
                line: 11,
            },
        ];
        profile.sample = vec![message::Sample {
            location_id: vec![2],
            value: vec![4],
            label: vec![],
        }];

        let group = import(&profile).unwrap().unwrap();
        let p = group.default_profile();
        let root = p.node(p.roots()[0]);
        assert_eq!(p.frame(root.frame()).name(), "main");
        assert_eq!(p.frame_by_name("work").unwrap().self_weight(), 4.0);
    }

    #[test]
    fn unsymbolized_locations_use_address() {
        let mut profile = sample_profile();
        profile.location[0].line.clear();
        let group = import(&profile).unwrap().unwrap();
        let frame = group.default_profile().frame_by_name("0x401000").unwrap();
        assert_eq!(frame.file(), Some("/bin/app"));
    }

    #[test]
    fn no_sample_types_is_not_a_profile() {
        let mut profile = sample_profile();
        profile.sample_type.clear();
        assert!(import(&profile).unwrap().is_none());
    }
}
