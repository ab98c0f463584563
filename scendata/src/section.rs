//! Section kinds and the scenario aggregate.
//!
//! A scenario is six sections, each independently serializable. The
//! aggregate wires the two cross-cutting protocols together: the
//! identifier cascade runs across every section, and validation runs
//! in dependency order so each section resolves its own references
//! before anything cross-references into it.

use std::fs;
use std::path::Path;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::area::{Area, AreaScope, AreaSection};
use crate::entities::EntitySection;
use crate::error::ModelError;
use crate::factions::FactionSection;
use crate::identifier::{
    Authority, ContentEntity, EditContext, Identifier, IdentifierRegistry,
};
use crate::images::{AllImages, ImageLookup, ImageSection, ImageStack};
use crate::master::MasterSection;
use crate::variables::VariableSection;
use crate::xml::xml_err;

/// Root element of a scenario document.
pub const DOCUMENT_ROOT: &str = "scenario";

/// The closed set of six section kinds. This set must never grow
/// silently: the name mapping below and the composer both reject
/// anything outside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    Areas,
    Entities,
    Factions,
    Images,
    Master,
    Variables,
}

impl SectionKind {
    pub const ALL: [SectionKind; 6] = [
        SectionKind::Areas,
        SectionKind::Entities,
        SectionKind::Factions,
        SectionKind::Images,
        SectionKind::Master,
        SectionKind::Variables,
    ];

    /// The section's XML element name. Exact inverse of
    /// [`SectionKind::from_xml_name`].
    pub fn xml_name(self) -> &'static str {
        match self {
            SectionKind::Areas => "area",
            SectionKind::Entities => "rules",
            SectionKind::Factions => "factions",
            SectionKind::Images => "imageStack",
            SectionKind::Master => "info",
            SectionKind::Variables => "variables",
        }
    }

    /// Maps an XML element name back to its section kind. Any name
    /// outside the fixed set is an argument error.
    pub fn from_xml_name(name: &str) -> Result<Self, ModelError> {
        match name {
            "area" => Ok(SectionKind::Areas),
            "rules" => Ok(SectionKind::Entities),
            "factions" => Ok(SectionKind::Factions),
            "imageStack" => Ok(SectionKind::Images),
            "info" => Ok(SectionKind::Master),
            "variables" => Ok(SectionKind::Variables),
            other => Err(ModelError::InvalidArgument(format!(
                "unknown section element '{other}'"
            ))),
        }
    }
}

/// The complete in-memory scenario content model.
#[derive(Debug, Default)]
pub struct Scenario {
    registry: IdentifierRegistry,
    master: MasterSection,
    variables: VariableSection,
    entities: EntitySection,
    factions: FactionSection,
    images: ImageSection,
    areas: AreaSection,
}

impl Scenario {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn master(&self) -> &MasterSection {
        &self.master
    }

    pub fn variables(&self) -> &VariableSection {
        &self.variables
    }

    pub fn entities(&self) -> &EntitySection {
        &self.entities
    }

    pub fn factions(&self) -> &FactionSection {
        &self.factions
    }

    pub fn images(&self) -> &ImageSection {
        &self.images
    }

    pub fn areas(&self) -> &AreaSection {
        &self.areas
    }

    pub fn master_mut(&mut self, _edit: &EditContext) -> &mut MasterSection {
        &mut self.master
    }

    pub fn variables_mut(&mut self, _edit: &EditContext) -> &mut VariableSection {
        &mut self.variables
    }

    pub fn entities_mut(&mut self, _edit: &EditContext) -> &mut EntitySection {
        &mut self.entities
    }

    pub fn factions_mut(&mut self, _edit: &EditContext) -> &mut FactionSection {
        &mut self.factions
    }

    pub fn images_mut(&mut self, _edit: &EditContext) -> &mut ImageSection {
        &mut self.images
    }

    pub fn areas_mut(&mut self, _edit: &EditContext) -> &mut AreaSection {
        &mut self.areas
    }

    /// Interns an identifier in the scenario's shared pool.
    pub fn intern(&mut self, name: &str) -> Identifier {
        self.registry.intern(name)
    }

    /// Whether any section dictionary owns `id` as a key.
    pub fn contains_identifier(&self, id: &str) -> bool {
        self.variables.get_variable(id).is_some()
            || self.entities.get(id).is_some()
            || self.factions.get(id).is_some()
            || self.images.get(id).is_some()
            || self.areas.get(id).is_some()
    }

    /// Parses a combined scenario document from a file.
    pub fn read(path: &Path) -> Result<Self, ModelError> {
        let text = fs::read_to_string(path)?;
        let scenario = Self::read_str(&text)?;
        log::info!(
            "loaded scenario '{}' from {}",
            scenario.master.name(),
            path.display()
        );
        Ok(scenario)
    }

    /// Parses a combined scenario document. Include markers left by
    /// the composer are XML comments and pass through unnoticed.
    pub fn read_str(text: &str) -> Result<Self, ModelError> {
        let mut scenario = Scenario::new();
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        // Locate the document root.
        loop {
            match reader.read_event().map_err(xml_err)? {
                Event::Start(e) if e.name().as_ref() == DOCUMENT_ROOT.as_bytes() => break,
                Event::Decl(_) | Event::Comment(_) | Event::Text(_) | Event::PI(_)
                | Event::DocType(_) => {}
                Event::Eof => {
                    return Err(ModelError::Parse(format!(
                        "document has no <{DOCUMENT_ROOT}> root"
                    )))
                }
                other => {
                    return Err(ModelError::Parse(format!(
                        "expected <{DOCUMENT_ROOT}> root, found {other:?}"
                    )))
                }
            }
        }

        loop {
            let event = reader.read_event().map_err(xml_err)?;
            match event {
                Event::Start(ref e) | Event::Empty(ref e) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    let kind = SectionKind::from_xml_name(&name)?;
                    let empty = matches!(event, Event::Empty(_));
                    match kind {
                        SectionKind::Master => {
                            scenario.master.read_xml(&mut reader, e, empty)?;
                        }
                        SectionKind::Variables => {
                            if !empty {
                                scenario
                                    .variables
                                    .read_xml(&mut reader, &mut scenario.registry)?;
                            }
                        }
                        SectionKind::Entities => {
                            if !empty {
                                scenario
                                    .entities
                                    .read_xml(&mut reader, &mut scenario.registry)?;
                            }
                        }
                        SectionKind::Factions => {
                            if !empty {
                                scenario
                                    .factions
                                    .read_xml(&mut reader, &mut scenario.registry)?;
                            }
                        }
                        SectionKind::Areas => {
                            let (id, area) =
                                Area::read_xml(&mut reader, e, empty, &mut scenario.registry)?;
                            scenario.areas.insert_parsed(id, area)?;
                        }
                        SectionKind::Images => {
                            let (id, stack) = ImageStack::read_xml(
                                &mut reader,
                                e,
                                empty,
                                &mut scenario.registry,
                            )?;
                            scenario.images.insert_parsed(id, stack)?;
                        }
                    }
                }
                Event::End(e) if e.name().as_ref() == DOCUMENT_ROOT.as_bytes() => break,
                Event::Comment(_) | Event::Text(_) => {}
                Event::Eof => {
                    return Err(ModelError::Parse(format!(
                        "unexpected end of <{DOCUMENT_ROOT}>"
                    )))
                }
                other => {
                    return Err(ModelError::Parse(format!(
                        "unexpected content in <{DOCUMENT_ROOT}>: {other:?}"
                    )))
                }
            }
        }

        log::debug!(
            "parsed {} variables, {} entity classes, {} factions, {} stacks, {} areas",
            scenario.variables.len(),
            scenario.entities.len(),
            scenario.factions.len(),
            scenario.images.len(),
            scenario.areas.len()
        );
        Ok(scenario)
    }

    /// Serializes the scenario as one combined document.
    pub fn write_string(&self) -> Result<String, ModelError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_err)?;
        writer
            .write_event(Event::Start(BytesStart::new(DOCUMENT_ROOT)))
            .map_err(xml_err)?;
        self.master.write_xml(&mut writer)?;
        self.variables.write_xml(&mut writer)?;
        self.entities.write_xml(&mut writer)?;
        self.factions.write_xml(&mut writer)?;
        self.images.write_xml(&mut writer)?;
        self.areas.write_xml(&mut writer)?;
        writer
            .write_event(Event::End(BytesEnd::new(DOCUMENT_ROOT)))
            .map_err(xml_err)?;
        String::from_utf8(writer.into_inner())
            .map_err(|e| ModelError::Parse(format!("serialized document is not UTF-8: {e}")))
    }

    pub fn write(&self, path: &Path) -> Result<(), ModelError> {
        let text = self.write_string()?;
        fs::write(path, text)?;
        log::info!("wrote scenario '{}' to {}", self.master.name(), path.display());
        Ok(())
    }

    /// The two-phase validation pass over every section, in dependency
    /// order: sections resolve their own references before anything
    /// cross-references into them. Uses a permissive image lookup; use
    /// [`Scenario::validate_with`] when an image store is available.
    pub fn validate(&mut self, authority: Authority) -> Result<(), ModelError> {
        self.validate_with(&AllImages, authority)
    }

    pub fn validate_with(
        &mut self,
        image_store: &dyn ImageLookup,
        authority: Authority,
    ) -> Result<(), ModelError> {
        let Scenario {
            master,
            variables,
            entities,
            factions,
            images,
            areas,
            ..
        } = self;
        master.validate((), authority)?;
        variables.validate((), authority)?;
        entities.validate(&*variables, authority)?;
        factions.validate((), authority)?;
        images.validate(image_store, authority)?;
        areas.validate(
            AreaScope {
                grid: master.grid(),
                factions: &*factions,
                entities: &*entities,
                variables: &*variables,
            },
            authority,
        )?;
        log::debug!("scenario '{}' validated", master.name());
        Ok(())
    }

    /// Runs the identifier cascade across every section, dictionary
    /// keys and values alike. Rename mode refuses to collide with an
    /// existing identifier before touching anything.
    pub fn process_identifier(
        &mut self,
        old: &Identifier,
        new: Option<&Identifier>,
        _edit: &EditContext,
    ) -> Result<usize, ModelError> {
        if let Some(n) = new {
            if n != old && self.contains_identifier(n) {
                return Err(ModelError::DuplicateIdentifier(n.to_string()));
            }
        }
        Ok(self.cascade(old, new))
    }

    /// Counting convenience: how many occurrences a deletion of `id`
    /// would touch. Mutates nothing.
    pub fn count_references(&mut self, id: &Identifier, _edit: &EditContext) -> usize {
        self.cascade(id, Some(id))
    }

    fn cascade(&mut self, old: &Identifier, new: Option<&Identifier>) -> usize {
        self.variables.process_identifier(old, new)
            + self.entities.process_identifier(old, new)
            + self.factions.process_identifier(old, new)
            + self.images.process_identifier(old, new)
            + self.areas.process_identifier(old, new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::Rect;
    use crate::entities::{EntityCategory, EntityClass, EntityTemplate};
    use crate::factions::{Condition, ConditionParameter, FactionClass};
    use crate::master::GridSize;
    use crate::modifier::{ModifierTarget, VariableModifier};
    use crate::variables::{VariableCategory, VariableClass};

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<scenario>
  <info name="Border Clash">
    <description>Two factions fight over a river crossing.</description>
    <grid width="48" height="32"/>
  </info>
  <variables>
    <attribute id="speed" name="Speed"/>
    <resource id="gold" name="Gold"/>
  </variables>
  <rules>
    <unit id="spearman" name="Spearman">
      <modifier variable="speed">
        <value target="Self">1</value>
      </modifier>
    </unit>
    <terrain id="grass" name="Grass" background="true"/>
    <effect id="fog" name="Fog"/>
    <upgrade id="forge" name="Forge">
      <modifier variable="gold">
        <value target="Owner">-2</value>
      </modifier>
    </upgrade>
  </rules>
  <factions>
    <faction id="Empire" name="The Empire">
      <victory parameter="Sites" threshold="3"/>
      <defeat parameter="Units" threshold="0"/>
    </faction>
    <faction id="Horde" name="The Horde"/>
  </factions>
  <imageStack id="castle">
    <image ref="castle_base"/>
    <image ref="flag"/>
  </imageStack>
  <area id="north" owner="Empire" unitOwner="Empire">
    <bounds x="0" y="0" width="8" height="8"/>
    <unit class="spearman"/>
  </area>
  <area id="south" owner="" unitOwner="">
    <bounds x="0" y="24" width="8" height="8"/>
  </area>
</scenario>
"#;

    #[test]
    fn test_section_name_mapping_is_exact_inverse() {
        for kind in SectionKind::ALL {
            assert_eq!(SectionKind::from_xml_name(kind.xml_name()).unwrap(), kind);
        }
        assert!(matches!(
            SectionKind::from_xml_name("weather"),
            Err(ModelError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_read_sample_document() {
        let scenario = Scenario::read_str(SAMPLE).unwrap();
        assert_eq!(scenario.master().name(), "Border Clash");
        assert_eq!(scenario.master().grid(), GridSize::new(48, 32));
        assert_eq!(scenario.variables().len(), 2);
        assert_eq!(scenario.entities().len(), 4);
        assert_eq!(scenario.factions().len(), 2);
        assert_eq!(scenario.images().len(), 1);
        assert_eq!(scenario.areas().len(), 2);

        let empire = scenario.factions().get("Empire").unwrap();
        assert_eq!(
            empire.victory_conditions(),
            &[Condition::new(ConditionParameter::Sites, 3)]
        );

        let north = scenario.areas().get("north").unwrap();
        assert_eq!(north.owner().id().unwrap().as_str(), "Empire");
        assert_eq!(north.units().len(), 1);

        let south = scenario.areas().get("south").unwrap();
        assert!(!south.owner().is_set());
    }

    #[test]
    fn test_validate_runtime_then_editor_tolerance() {
        let mut scenario = Scenario::read_str(SAMPLE).unwrap();
        scenario.validate(Authority::Runtime).unwrap();

        // Break the owner reference.
        let edit = EditContext::new();
        let atlantis = scenario.intern("Atlantis");
        scenario
            .areas_mut(&edit)
            .get_mut("north", &edit)
            .unwrap()
            .set_owner(Some(atlantis), &edit);

        let err = scenario.validate(Authority::Runtime).unwrap_err();
        assert!(matches!(err, ModelError::UnresolvedReference { .. }));

        scenario.validate(Authority::Editor).unwrap();
        let north = scenario.areas().get("north").unwrap();
        assert_eq!(north.owner().id().unwrap().as_str(), "Atlantis");
        assert!(!north.owner().is_resolved());
    }

    #[test]
    fn test_write_read_round_trip() {
        let mut scenario = Scenario::read_str(SAMPLE).unwrap();
        scenario.validate(Authority::Editor).unwrap();
        let text = scenario.write_string().unwrap();
        let reread = Scenario::read_str(&text).unwrap();

        assert_eq!(reread.master(), scenario.master());
        assert_eq!(reread.variables().len(), scenario.variables().len());
        assert_eq!(reread.entities().len(), scenario.entities().len());
        assert_eq!(reread.factions().len(), scenario.factions().len());
        assert_eq!(reread.areas().len(), scenario.areas().len());
        assert_eq!(
            reread.areas().get("north").unwrap(),
            scenario.areas().get("north").unwrap()
        );
        let order: Vec<&str> = reread.factions().factions().map(|f| f.id().as_str()).collect();
        assert_eq!(order, vec!["Empire", "Horde"]);
    }

    #[test]
    fn test_cross_section_rename_cascade() {
        let mut scenario = Scenario::read_str(SAMPLE).unwrap();
        let edit = EditContext::new();
        let old = scenario.intern("Empire");
        let new = scenario.intern("Dominion");

        let count = scenario.count_references(&old, &edit);
        // Faction key, area owner, area unit owner.
        assert_eq!(count, 3);

        let changed = scenario.process_identifier(&old, Some(&new), &edit).unwrap();
        assert_eq!(changed, count);
        assert!(scenario.factions().get("Empire").is_none());
        assert!(scenario.factions().get("Dominion").is_some());
        let north = scenario.areas().get("north").unwrap();
        assert_eq!(north.owner().id().unwrap().as_str(), "Dominion");
        assert_eq!(north.unit_owner().id().unwrap().as_str(), "Dominion");

        // Round trip back restores the original names.
        scenario.process_identifier(&new, Some(&old), &edit).unwrap();
        assert!(scenario.factions().get("Empire").is_some());
        scenario.validate(Authority::Runtime).unwrap();
    }

    #[test]
    fn test_rename_onto_existing_identifier_is_rejected() {
        let mut scenario = Scenario::read_str(SAMPLE).unwrap();
        let edit = EditContext::new();
        let old = scenario.intern("Empire");
        let new = scenario.intern("Horde");
        let err = scenario.process_identifier(&old, Some(&new), &edit).unwrap_err();
        assert!(matches!(err, ModelError::DuplicateIdentifier(_)));
        // Nothing moved.
        assert!(scenario.factions().get("Empire").is_some());
    }

    #[test]
    fn test_delete_cascade_matches_count() {
        let mut scenario = Scenario::read_str(SAMPLE).unwrap();
        let edit = EditContext::new();
        let id = scenario.intern("spearman");

        let counted = scenario.count_references(&id, &edit);
        // Class key plus one template placement.
        assert_eq!(counted, 2);

        let deleted = scenario.process_identifier(&id, None, &edit).unwrap();
        assert_eq!(deleted, counted);
        assert!(scenario.entities().get("spearman").is_none());
        assert!(scenario.areas().get("north").unwrap().units().is_empty());
        scenario.validate(Authority::Runtime).unwrap();
    }

    #[test]
    fn test_programmatic_build_and_save() {
        let edit = EditContext::new();
        let mut scenario = Scenario::new();
        scenario.master_mut(&edit).set_name("Skirmish", &edit);
        scenario
            .master_mut(&edit)
            .set_grid(GridSize::new(16, 16), &edit);

        let gold = scenario.intern("gold");
        scenario
            .variables_mut(&edit)
            .insert(
                VariableClass::new(gold.clone(), VariableCategory::Resource, "Gold"),
                &edit,
            )
            .unwrap();

        let mine = scenario.intern("mine");
        let mut mine_class =
            EntityClass::new(mine.clone(), EntityCategory::Upgrade, "Gold Mine");
        let mut income = VariableModifier::new();
        income
            .set_by_target(ModifierTarget::Owner, Some(3), &edit)
            .unwrap();
        mine_class.set_modifier(gold, income, &edit);
        scenario.entities_mut(&edit).insert(mine_class, &edit).unwrap();

        let rebels = scenario.intern("Rebels");
        scenario
            .factions_mut(&edit)
            .insert(FactionClass::new(rebels.clone(), "Rebels"), &edit)
            .unwrap();

        let mut camp = Area::new();
        camp.push_bounds(Rect::new(2, 2, 3, 3).unwrap(), &edit);
        camp.set_owner(Some(rebels), &edit);
        camp.add_effect(EntityTemplate::new(mine.clone()), &edit);
        // An upgrade cannot stand in the effects list.
        let camp_id = scenario.intern("camp");
        scenario
            .areas_mut(&edit)
            .insert(camp_id, camp, &edit)
            .unwrap();

        let err = scenario.validate(Authority::Runtime).unwrap_err();
        assert!(matches!(err, ModelError::Schema(_)));
    }
}
