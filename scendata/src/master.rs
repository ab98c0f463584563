//! The master section: scenario metadata and the map grid.

use std::io::Write;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::area::Rect;
use crate::error::ModelError;
use crate::identifier::{Authority, ContentEntity, EditContext, Identifier};
use crate::xml::{self, xml_err};

/// Map grid dimensions. Implements the grid/bounds containment
/// contract that area validation checks against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GridSize {
    width: u32,
    height: u32,
}

impl GridSize {
    pub fn new(width: u32, height: u32) -> Self {
        GridSize { width, height }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Whether `rect` lies entirely inside the grid. Widened to u64 so
    /// coordinates near `u32::MAX` cannot wrap.
    pub fn contains(&self, rect: &Rect) -> bool {
        (rect.x() as u64 + rect.width() as u64) <= self.width as u64
            && (rect.y() as u64 + rect.height() as u64) <= self.height as u64
    }
}

/// The `info` section: scenario name, description and grid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MasterSection {
    name: String,
    description: String,
    grid: GridSize,
}

impl MasterSection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn grid(&self) -> GridSize {
        self.grid
    }

    pub fn set_name(&mut self, name: &str, _edit: &EditContext) {
        self.name = name.to_string();
    }

    pub fn set_description(&mut self, description: &str, _edit: &EditContext) {
        self.description = description.to_string();
    }

    pub fn set_grid(&mut self, grid: GridSize, _edit: &EditContext) {
        self.grid = grid;
    }

    /// Reads the body of an `<info>` element. The start tag carries
    /// the scenario name.
    pub(crate) fn read_xml(
        &mut self,
        reader: &mut Reader<&[u8]>,
        start: &BytesStart,
        empty: bool,
    ) -> Result<(), ModelError> {
        self.name = xml::attr(start, "name")?.unwrap_or_default();
        if empty {
            return Ok(());
        }
        loop {
            match reader.read_event().map_err(xml_err)? {
                Event::Start(e) if e.name().as_ref() == b"description" => {
                    self.description = xml::read_text(reader, &e)?;
                }
                Event::Empty(e) if e.name().as_ref() == b"description" => {
                    self.description.clear();
                }
                Event::Empty(e) | Event::Start(e) if e.name().as_ref() == b"grid" => {
                    self.grid = GridSize::new(
                        xml::require_attr_u32(&e, "width")?,
                        xml::require_attr_u32(&e, "height")?,
                    );
                }
                Event::End(e) if e.name().as_ref() == b"info" => break,
                Event::Text(_) | Event::Comment(_) => {}
                Event::Eof => return Err(ModelError::Parse("unexpected end of <info>".into())),
                other => {
                    return Err(ModelError::Parse(format!(
                        "unexpected content in <info>: {other:?}"
                    )))
                }
            }
        }
        Ok(())
    }

    pub(crate) fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> Result<(), ModelError> {
        let mut el = BytesStart::new("info");
        el.push_attribute(("name", self.name.as_str()));
        writer.write_event(Event::Start(el)).map_err(xml_err)?;
        if !self.description.is_empty() {
            writer
                .write_event(Event::Start(BytesStart::new("description")))
                .map_err(xml_err)?;
            writer
                .write_event(Event::Text(BytesText::new(&self.description)))
                .map_err(xml_err)?;
            writer
                .write_event(Event::End(BytesEnd::new("description")))
                .map_err(xml_err)?;
        }
        let mut grid = BytesStart::new("grid");
        let width = self.grid.width.to_string();
        let height = self.grid.height.to_string();
        grid.push_attribute(("width", width.as_str()));
        grid.push_attribute(("height", height.as_str()));
        writer.write_event(Event::Empty(grid)).map_err(xml_err)?;
        writer
            .write_event(Event::End(BytesEnd::new("info")))
            .map_err(xml_err)?;
        Ok(())
    }
}

impl ContentEntity for MasterSection {
    type Scope<'a> = ();

    fn process_identifier(&mut self, _old: &Identifier, _new: Option<&Identifier>) -> usize {
        // The master section names no identifiers.
        0
    }

    fn validate(&mut self, _scope: (), authority: Authority) -> Result<(), ModelError> {
        if authority == Authority::Editor {
            return Ok(());
        }
        if self.name.is_empty() {
            return Err(ModelError::Schema("scenario has no name".into()));
        }
        if self.grid.width == 0 || self.grid.height == 0 {
            return Err(ModelError::Schema(format!(
                "map grid {}x{} has zero extent",
                self.grid.width, self.grid.height
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_containment_edges() {
        let grid = GridSize::new(10, 8);
        assert!(grid.contains(&Rect::new(0, 0, 10, 8).unwrap()));
        assert!(grid.contains(&Rect::new(9, 7, 1, 1).unwrap()));
        assert!(!grid.contains(&Rect::new(9, 7, 2, 1).unwrap()));
        assert!(!grid.contains(&Rect::new(0, 8, 1, 1).unwrap()));
        // Near-overflow coordinates must not wrap into range.
        assert!(!grid.contains(&Rect::new(u32::MAX, 0, 2, 1).unwrap()));
    }

    #[test]
    fn test_runtime_validation_requires_name_and_grid() {
        let mut section = MasterSection::new();
        assert!(section.validate((), Authority::Editor).is_ok());
        assert!(matches!(
            section.validate((), Authority::Runtime),
            Err(ModelError::Schema(_))
        ));

        let edit = EditContext::new();
        section.set_name("Border Clash", &edit);
        assert!(matches!(
            section.validate((), Authority::Runtime),
            Err(ModelError::Schema(_))
        ));
        section.set_grid(GridSize::new(32, 32), &edit);
        section.validate((), Authority::Runtime).unwrap();
    }

    #[test]
    fn test_xml_round_trip() {
        let edit = EditContext::new();
        let mut section = MasterSection::new();
        section.set_name("Border Clash", &edit);
        section.set_description("Two factions fight over a river crossing.", &edit);
        section.set_grid(GridSize::new(48, 32), &edit);

        let mut writer = Writer::new(Vec::new());
        section.write_xml(&mut writer).unwrap();
        let xml = String::from_utf8(writer.into_inner()).unwrap();

        let mut parsed = MasterSection::new();
        let mut reader = Reader::from_str(&xml);
        reader.config_mut().trim_text(true);
        let start = match reader.read_event().unwrap() {
            Event::Start(e) => e.into_owned(),
            other => panic!("expected info start, got {other:?}"),
        };
        parsed.read_xml(&mut reader, &start, false).unwrap();

        assert_eq!(parsed, section);
    }
}
