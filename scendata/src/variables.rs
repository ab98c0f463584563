//! Gameplay variable definitions: attributes, counters and resources.

use std::io::Write;

use indexmap::IndexMap;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::error::ModelError;
use crate::identifier::{
    process_map_keys, Authority, ContentEntity, EditContext, Identifier, IdentifierRegistry,
};
use crate::xml::{self, xml_err};

/// The closed set of variable categories. Exhaustively switched over in
/// validation, serialization and modifier applicability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableCategory {
    /// Intrinsic property of an entity (speed, sight). Never
    /// propagates through ownership.
    Attribute,
    /// Running tally tracked per entity or faction.
    Counter,
    /// Spendable stockpile owned by a faction.
    Resource,
}

impl VariableCategory {
    pub const ALL: [VariableCategory; 3] = [
        VariableCategory::Attribute,
        VariableCategory::Counter,
        VariableCategory::Resource,
    ];

    pub fn xml_name(self) -> &'static str {
        match self {
            VariableCategory::Attribute => "attribute",
            VariableCategory::Counter => "counter",
            VariableCategory::Resource => "resource",
        }
    }

    pub fn from_xml_name(name: &str) -> Option<Self> {
        match name {
            "attribute" => Some(VariableCategory::Attribute),
            "counter" => Some(VariableCategory::Counter),
            "resource" => Some(VariableCategory::Resource),
            _ => None,
        }
    }
}

/// A typed gameplay variable definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableClass {
    id: Identifier,
    category: VariableCategory,
    display_name: String,
}

impl VariableClass {
    pub fn new(id: Identifier, category: VariableCategory, display_name: &str) -> Self {
        VariableClass {
            id,
            category,
            display_name: display_name.to_string(),
        }
    }

    pub fn id(&self) -> &Identifier {
        &self.id
    }

    /// Immutable after construction.
    pub fn category(&self) -> VariableCategory {
        self.category
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn set_display_name(&mut self, name: &str, _edit: &EditContext) {
        self.display_name = name.to_string();
    }
}

/// The variables section: an order-preserving dictionary of variable
/// definitions. Insertion order defines evaluation and display order.
#[derive(Debug, Default)]
pub struct VariableSection {
    variables: IndexMap<Identifier, VariableClass>,
}

impl VariableSection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_variable(&self, id: &str) -> Option<&VariableClass> {
        self.variables.get(id)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.variables.get_index_of(id)
    }

    /// All definitions in evaluation order.
    pub fn variables(&self) -> impl Iterator<Item = &VariableClass> {
        self.variables.values()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn insert(
        &mut self,
        class: VariableClass,
        _edit: &EditContext,
    ) -> Result<(), ModelError> {
        if self.variables.contains_key(class.id.as_str()) {
            return Err(ModelError::DuplicateIdentifier(class.id.to_string()));
        }
        self.variables.insert(class.id.clone(), class);
        Ok(())
    }

    pub(crate) fn insert_parsed(&mut self, class: VariableClass) -> Result<(), ModelError> {
        if self.variables.contains_key(class.id.as_str()) {
            return Err(ModelError::DuplicateIdentifier(class.id.to_string()));
        }
        self.variables.insert(class.id.clone(), class);
        Ok(())
    }

    /// Reads the body of a `<variables>` element.
    pub(crate) fn read_xml(
        &mut self,
        reader: &mut Reader<&[u8]>,
        registry: &mut IdentifierRegistry,
    ) -> Result<(), ModelError> {
        loop {
            let event = reader.read_event().map_err(xml_err)?;
            match event {
                Event::Empty(ref e) | Event::Start(ref e) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    let category = VariableCategory::from_xml_name(&name).ok_or_else(|| {
                        ModelError::Parse(format!("unexpected element <{name}> in <variables>"))
                    })?;
                    let id = registry.intern(&xml::require_attr(e, "id")?);
                    let display_name = xml::attr(e, "name")?.unwrap_or_default();
                    self.insert_parsed(VariableClass::new(id, category, &display_name))?;
                    if matches!(event, Event::Start(_)) {
                        xml::skip_element(reader, e)?;
                    }
                }
                Event::End(e) if e.name().as_ref() == b"variables" => break,
                Event::Text(_) | Event::Comment(_) => {}
                Event::Eof => {
                    return Err(ModelError::Parse("unexpected end of <variables>".into()))
                }
                other => {
                    return Err(ModelError::Parse(format!(
                        "unexpected content in <variables>: {other:?}"
                    )))
                }
            }
        }
        Ok(())
    }

    pub(crate) fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> Result<(), ModelError> {
        writer
            .write_event(Event::Start(BytesStart::new("variables")))
            .map_err(xml_err)?;
        for class in self.variables.values() {
            let mut el = BytesStart::new(class.category.xml_name());
            el.push_attribute(("id", class.id.as_str()));
            el.push_attribute(("name", class.display_name.as_str()));
            writer.write_event(Event::Empty(el)).map_err(xml_err)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("variables")))
            .map_err(xml_err)?;
        Ok(())
    }
}

impl ContentEntity for VariableSection {
    type Scope<'a> = ();

    fn process_identifier(&mut self, old: &Identifier, new: Option<&Identifier>) -> usize {
        process_map_keys(&mut self.variables, old, new, |class, renamed| {
            class.id = renamed.clone();
        })
    }

    fn validate(&mut self, _scope: (), _authority: Authority) -> Result<(), ModelError> {
        // Definitions carry no outward references; uniqueness was
        // enforced on insert.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section() -> (VariableSection, EditContext) {
        let edit = EditContext::new();
        let mut s = VariableSection::new();
        s.insert(
            VariableClass::new(Identifier::new("speed"), VariableCategory::Attribute, "Speed"),
            &edit,
        )
        .unwrap();
        s.insert(
            VariableClass::new(Identifier::new("gold"), VariableCategory::Resource, "Gold"),
            &edit,
        )
        .unwrap();
        s.insert(
            VariableClass::new(Identifier::new("kills"), VariableCategory::Counter, "Kills"),
            &edit,
        )
        .unwrap();
        (s, edit)
    }

    #[test]
    fn test_insert_rejects_duplicate() {
        let (mut s, edit) = section();
        let err = s
            .insert(
                VariableClass::new(Identifier::new("gold"), VariableCategory::Counter, "Gold 2"),
                &edit,
            )
            .unwrap_err();
        assert!(matches!(err, ModelError::DuplicateIdentifier(_)));
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn test_evaluation_order_is_insertion_order() {
        let (s, _) = section();
        let order: Vec<&str> = s.variables().map(|v| v.id().as_str()).collect();
        assert_eq!(order, vec!["speed", "gold", "kills"]);
    }

    #[test]
    fn test_rename_syncs_key_and_id_field() {
        let (mut s, _) = section();
        let old = Identifier::new("gold");
        let new = Identifier::new("coin");
        assert_eq!(s.process_identifier(&old, Some(&new)), 1);
        assert!(s.get_variable("gold").is_none());
        let renamed = s.get_variable("coin").unwrap();
        assert_eq!(renamed.id().as_str(), "coin");
        assert_eq!(renamed.category(), VariableCategory::Resource);
        let order: Vec<&str> = s.variables().map(|v| v.id().as_str()).collect();
        assert_eq!(order, vec!["speed", "coin", "kills"]);
    }

    #[test]
    fn test_xml_round_trip() {
        let (s, _) = section();
        let mut writer = Writer::new(Vec::new());
        s.write_xml(&mut writer).unwrap();
        let xml = String::from_utf8(writer.into_inner()).unwrap();

        let mut parsed = VariableSection::new();
        let mut registry = IdentifierRegistry::new();
        let mut reader = Reader::from_str(&xml);
        reader.config_mut().trim_text(true);
        // Consume the <variables> start tag before handing off the body.
        match reader.read_event().unwrap() {
            Event::Start(e) => assert_eq!(e.name().as_ref(), b"variables"),
            other => panic!("expected variables start, got {other:?}"),
        }
        parsed.read_xml(&mut reader, &mut registry).unwrap();

        assert_eq!(parsed.len(), 3);
        assert_eq!(
            parsed.get_variable("speed").unwrap().category(),
            VariableCategory::Attribute
        );
        assert_eq!(parsed.get_variable("gold").unwrap().display_name(), "Gold");
    }
}
