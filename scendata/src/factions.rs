//! Faction definitions with victory and defeat conditions.

use std::io::Write;

use indexmap::IndexMap;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::error::ModelError;
use crate::identifier::{
    process_map_keys, Authority, ContentEntity, EditContext, Identifier, IdentifierRegistry,
};
use crate::xml::{self, xml_err};

/// What a victory/defeat condition measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionParameter {
    /// Number of sites (areas) held.
    Sites,
    /// Number of units alive.
    Units,
    /// Combined strength of all units.
    UnitStrength,
    /// Elapsed turn count.
    Turns,
}

impl ConditionParameter {
    pub const ALL: [ConditionParameter; 4] = [
        ConditionParameter::Sites,
        ConditionParameter::Units,
        ConditionParameter::UnitStrength,
        ConditionParameter::Turns,
    ];

    pub fn xml_name(self) -> &'static str {
        match self {
            ConditionParameter::Sites => "Sites",
            ConditionParameter::Units => "Units",
            ConditionParameter::UnitStrength => "UnitStrength",
            ConditionParameter::Turns => "Turns",
        }
    }

    pub fn from_xml_name(name: &str) -> Result<Self, ModelError> {
        match name {
            "Sites" => Ok(ConditionParameter::Sites),
            "Units" => Ok(ConditionParameter::Units),
            "UnitStrength" => Ok(ConditionParameter::UnitStrength),
            "Turns" => Ok(ConditionParameter::Turns),
            other => Err(ModelError::InvalidArgument(format!(
                "unknown condition parameter '{other}'"
            ))),
        }
    }
}

/// An immutable parameter/threshold pair. Hashing covers both fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Condition {
    parameter: ConditionParameter,
    threshold: u32,
}

impl Condition {
    pub fn new(parameter: ConditionParameter, threshold: u32) -> Self {
        Condition { parameter, threshold }
    }

    pub fn parameter(&self) -> ConditionParameter {
        self.parameter
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Conditions serialize under a caller-specified element name
    /// (`victory` or `defeat`).
    pub(crate) fn read_xml(start: &BytesStart) -> Result<Self, ModelError> {
        let parameter = ConditionParameter::from_xml_name(&xml::require_attr(start, "parameter")?)?;
        let threshold = xml::require_attr_u32(start, "threshold")?;
        Ok(Condition::new(parameter, threshold))
    }

    pub(crate) fn write_xml<W: Write>(
        &self,
        writer: &mut Writer<W>,
        element: &str,
    ) -> Result<(), ModelError> {
        let mut el = BytesStart::new(element);
        el.push_attribute(("parameter", self.parameter.xml_name()));
        let threshold = self.threshold.to_string();
        el.push_attribute(("threshold", threshold.as_str()));
        writer.write_event(Event::Empty(el)).map_err(xml_err)?;
        Ok(())
    }
}

/// One playable faction. Insertion order in the owning section defines
/// the turn sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct FactionClass {
    id: Identifier,
    display_name: String,
    victory: Vec<Condition>,
    defeat: Vec<Condition>,
}

impl FactionClass {
    pub fn new(id: Identifier, display_name: &str) -> Self {
        FactionClass {
            id,
            display_name: display_name.to_string(),
            victory: Vec::new(),
            defeat: Vec::new(),
        }
    }

    pub fn id(&self) -> &Identifier {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn victory_conditions(&self) -> &[Condition] {
        &self.victory
    }

    pub fn defeat_conditions(&self) -> &[Condition] {
        &self.defeat
    }

    pub fn add_victory(&mut self, condition: Condition, _edit: &EditContext) {
        self.victory.push(condition);
    }

    pub fn add_defeat(&mut self, condition: Condition, _edit: &EditContext) {
        self.defeat.push(condition);
    }
}

/// The factions section. Order-preserving: the dictionary order is the
/// turn sequence.
#[derive(Debug, Default)]
pub struct FactionSection {
    factions: IndexMap<Identifier, FactionClass>,
}

impl FactionSection {
    pub fn new() -> Self {
        Self::default()
    }

    /// The faction-lookup collaborator contract used by owner and
    /// unit-owner validation.
    pub fn get(&self, id: &str) -> Option<&FactionClass> {
        self.factions.get(id)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.factions.get_index_of(id)
    }

    /// Factions in turn order.
    pub fn factions(&self) -> impl Iterator<Item = &FactionClass> {
        self.factions.values()
    }

    pub fn len(&self) -> usize {
        self.factions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factions.is_empty()
    }

    pub fn insert(&mut self, faction: FactionClass, _edit: &EditContext) -> Result<(), ModelError> {
        if self.factions.contains_key(faction.id.as_str()) {
            return Err(ModelError::DuplicateIdentifier(faction.id.to_string()));
        }
        self.factions.insert(faction.id.clone(), faction);
        Ok(())
    }

    pub fn get_mut(&mut self, id: &str, _edit: &EditContext) -> Option<&mut FactionClass> {
        self.factions.get_mut(id)
    }

    /// Reads the body of a `<factions>` element.
    pub(crate) fn read_xml(
        &mut self,
        reader: &mut Reader<&[u8]>,
        registry: &mut IdentifierRegistry,
    ) -> Result<(), ModelError> {
        loop {
            let event = reader.read_event().map_err(xml_err)?;
            match event {
                Event::Empty(ref e) | Event::Start(ref e)
                    if e.name().as_ref() == b"faction" =>
                {
                    let id = registry.intern(&xml::require_attr(e, "id")?);
                    let display_name = xml::attr(e, "name")?.unwrap_or_default();
                    let mut faction = FactionClass::new(id, &display_name);
                    if matches!(event, Event::Start(_)) {
                        faction.read_conditions(reader)?;
                    }
                    if self.factions.contains_key(faction.id.as_str()) {
                        return Err(ModelError::DuplicateIdentifier(faction.id.to_string()));
                    }
                    self.factions.insert(faction.id.clone(), faction);
                }
                Event::End(e) if e.name().as_ref() == b"factions" => break,
                Event::Text(_) | Event::Comment(_) => {}
                Event::Eof => {
                    return Err(ModelError::Parse("unexpected end of <factions>".into()))
                }
                other => {
                    return Err(ModelError::Parse(format!(
                        "unexpected content in <factions>: {other:?}"
                    )))
                }
            }
        }
        Ok(())
    }

    pub(crate) fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> Result<(), ModelError> {
        writer
            .write_event(Event::Start(BytesStart::new("factions")))
            .map_err(xml_err)?;
        for faction in self.factions.values() {
            let mut el = BytesStart::new("faction");
            el.push_attribute(("id", faction.id.as_str()));
            el.push_attribute(("name", faction.display_name.as_str()));
            if faction.victory.is_empty() && faction.defeat.is_empty() {
                writer.write_event(Event::Empty(el)).map_err(xml_err)?;
                continue;
            }
            writer.write_event(Event::Start(el)).map_err(xml_err)?;
            for condition in &faction.victory {
                condition.write_xml(writer, "victory")?;
            }
            for condition in &faction.defeat {
                condition.write_xml(writer, "defeat")?;
            }
            writer
                .write_event(Event::End(BytesEnd::new("faction")))
                .map_err(xml_err)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("factions")))
            .map_err(xml_err)?;
        Ok(())
    }
}

impl FactionClass {
    fn read_conditions(&mut self, reader: &mut Reader<&[u8]>) -> Result<(), ModelError> {
        loop {
            let event = reader.read_event().map_err(xml_err)?;
            match event {
                Event::Empty(ref e) | Event::Start(ref e) => {
                    let condition = Condition::read_xml(e)?;
                    match e.name().as_ref() {
                        b"victory" => self.victory.push(condition),
                        b"defeat" => self.defeat.push(condition),
                        other => {
                            return Err(ModelError::Parse(format!(
                                "unexpected element <{}> in <faction>",
                                String::from_utf8_lossy(other)
                            )))
                        }
                    }
                    if matches!(event, Event::Start(_)) {
                        xml::skip_element(reader, e)?;
                    }
                }
                Event::End(e) if e.name().as_ref() == b"faction" => break,
                Event::Text(_) | Event::Comment(_) => {}
                Event::Eof => {
                    return Err(ModelError::Parse("unexpected end of <faction>".into()))
                }
                other => {
                    return Err(ModelError::Parse(format!(
                        "unexpected content in <faction>: {other:?}"
                    )))
                }
            }
        }
        Ok(())
    }
}

impl ContentEntity for FactionSection {
    type Scope<'a> = ();

    fn process_identifier(&mut self, old: &Identifier, new: Option<&Identifier>) -> usize {
        // Conditions hold no identifiers; only the dictionary keys and
        // the factions' own ids participate in the cascade.
        process_map_keys(&mut self.factions, old, new, |faction, renamed| {
            faction.id = renamed.clone();
        })
    }

    fn validate(&mut self, _scope: (), _authority: Authority) -> Result<(), ModelError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_condition_equality_covers_both_fields() {
        let a = Condition::new(ConditionParameter::Sites, 3);
        let b = Condition::new(ConditionParameter::Turns, 3);
        let c = Condition::new(ConditionParameter::Sites, 3);
        assert_ne!(a, b);
        assert_eq!(a, c);

        // Same threshold, different parameter: still two distinct set
        // members.
        let set: HashSet<Condition> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_turn_sequence_is_insertion_order() {
        let edit = EditContext::new();
        let mut section = FactionSection::new();
        for name in ["Empire", "Horde", "League"] {
            section
                .insert(FactionClass::new(Identifier::new(name), name), &edit)
                .unwrap();
        }
        let order: Vec<&str> = section.factions().map(|f| f.id().as_str()).collect();
        assert_eq!(order, vec!["Empire", "Horde", "League"]);
    }

    #[test]
    fn test_rename_round_trip_restores_section() {
        let edit = EditContext::new();
        let mut section = FactionSection::new();
        section
            .insert(FactionClass::new(Identifier::new("Empire"), "The Empire"), &edit)
            .unwrap();
        section
            .insert(FactionClass::new(Identifier::new("Horde"), "The Horde"), &edit)
            .unwrap();

        let a = Identifier::new("Empire");
        let b = Identifier::new("Dominion");
        assert_eq!(section.process_identifier(&a, Some(&b)), 1);
        assert_eq!(section.process_identifier(&b, Some(&a)), 1);

        let order: Vec<&str> = section.factions().map(|f| f.id().as_str()).collect();
        assert_eq!(order, vec!["Empire", "Horde"]);
        assert_eq!(section.get("Empire").unwrap().display_name(), "The Empire");
    }

    #[test]
    fn test_xml_round_trip() {
        let edit = EditContext::new();
        let mut section = FactionSection::new();
        let mut empire = FactionClass::new(Identifier::new("Empire"), "The Empire");
        empire.add_victory(Condition::new(ConditionParameter::Sites, 5), &edit);
        empire.add_defeat(Condition::new(ConditionParameter::Units, 0), &edit);
        section.insert(empire, &edit).unwrap();
        section
            .insert(FactionClass::new(Identifier::new("Horde"), "The Horde"), &edit)
            .unwrap();

        let mut writer = Writer::new(Vec::new());
        section.write_xml(&mut writer).unwrap();
        let xml = String::from_utf8(writer.into_inner()).unwrap();

        let mut parsed = FactionSection::new();
        let mut registry = IdentifierRegistry::new();
        let mut reader = Reader::from_str(&xml);
        reader.config_mut().trim_text(true);
        match reader.read_event().unwrap() {
            Event::Start(e) => assert_eq!(e.name().as_ref(), b"factions"),
            other => panic!("expected factions start, got {other:?}"),
        }
        parsed.read_xml(&mut reader, &mut registry).unwrap();

        assert_eq!(parsed.len(), 2);
        let empire = parsed.get("Empire").unwrap();
        assert_eq!(
            empire.victory_conditions(),
            &[Condition::new(ConditionParameter::Sites, 5)]
        );
        assert_eq!(
            empire.defeat_conditions(),
            &[Condition::new(ConditionParameter::Units, 0)]
        );
    }
}
