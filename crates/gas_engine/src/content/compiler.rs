use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use roxmltree::{Document, Node};

use crate::ability::{AbilityDef, AbilityId};
use crate::attributes::AttributeKind;
use crate::tags::TagContainer;
use crate::AppPaths;

use super::database::{
    AttributeModifier, CharacterDef, DefDatabase, DurationPolicy, EffectDef, ModifierOp,
};
use super::discovery::discover_mod_sources;
use super::types::{ContentPlanError, ContentPlanRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentErrorCode {
    Discovery,
    ReadFile,
    XmlMalformed,
    InvalidRoot,
    UnknownDefType,
    UnknownField,
    DuplicateField,
    MissingField,
    InvalidValue,
    DuplicateDefInMod,
    UnresolvedReference,
}

#[derive(Debug, Clone)]
pub struct ContentCompileError {
    pub code: ContentErrorCode,
    pub message: String,
    pub mod_id: String,
    pub file_path: PathBuf,
    pub location: Option<SourceLocation>,
}

impl fmt::Display for ContentCompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(
                f,
                "{:?}: {} (mod={}, file={}, line={}, column={})",
                self.code,
                self.message,
                self.mod_id,
                self.file_path.display(),
                loc.line,
                loc.column
            ),
            None => write!(
                f,
                "{:?}: {} (mod={}, file={})",
                self.code,
                self.message,
                self.mod_id,
                self.file_path.display()
            ),
        }
    }
}

impl std::error::Error for ContentCompileError {}

/// Where a def was declared, kept until cross references are resolved.
#[derive(Debug, Clone)]
struct DefOrigin {
    mod_id: String,
    file_path: PathBuf,
    location: SourceLocation,
}

impl DefOrigin {
    fn error(&self, code: ContentErrorCode, message: String) -> ContentCompileError {
        ContentCompileError {
            code,
            message,
            mod_id: self.mod_id.clone(),
            file_path: self.file_path.clone(),
            location: Some(self.location),
        }
    }
}

#[derive(Debug, Clone)]
enum ParsedDef {
    Effect(EffectDef),
    Ability(AbilityDef),
    Character(CharacterDef),
}

impl ParsedDef {
    fn kind(&self) -> &'static str {
        match self {
            Self::Effect(_) => "EffectDef",
            Self::Ability(_) => "AbilityDef",
            Self::Character(_) => "CharacterDef",
        }
    }

    fn def_name(&self) -> &str {
        match self {
            Self::Effect(def) => &def.def_name,
            Self::Ability(def) => &def.class_name,
            Self::Character(def) => &def.def_name,
        }
    }
}

#[derive(Default)]
struct MergedDefs {
    effects: BTreeMap<String, EffectDef>,
    abilities: BTreeMap<String, AbilityDef>,
    characters: BTreeMap<String, (CharacterDef, DefOrigin)>,
}

impl MergedDefs {
    // Cross-mod duplicates are intentional override points (last mod wins).
    fn insert(&mut self, def: ParsedDef, origin: DefOrigin) {
        match def {
            ParsedDef::Effect(def) => {
                self.effects.insert(def.def_name.clone(), def);
            }
            ParsedDef::Ability(def) => {
                self.abilities.insert(def.class_name.clone(), def);
            }
            ParsedDef::Character(def) => {
                self.characters.insert(def.def_name.clone(), (def, origin));
            }
        }
    }

    fn resolve(self) -> Result<DefDatabase, ContentCompileError> {
        let mut database = DefDatabase::new();
        for (def, origin) in self.characters.values() {
            let effect_refs = def
                .default_attributes
                .iter()
                .chain(def.startup_effects.iter());
            for effect in effect_refs {
                if !self.effects.contains_key(effect) {
                    return Err(origin.error(
                        ContentErrorCode::UnresolvedReference,
                        format!(
                            "CharacterDef '{}' references unknown EffectDef '{}'",
                            def.def_name, effect
                        ),
                    ));
                }
            }
            for ability in &def.abilities {
                if !self.abilities.contains_key(ability) {
                    return Err(origin.error(
                        ContentErrorCode::UnresolvedReference,
                        format!(
                            "CharacterDef '{}' references unknown AbilityDef '{}'",
                            def.def_name, ability
                        ),
                    ));
                }
            }
        }

        for def in self.effects.into_values() {
            database.insert_effect(def);
        }
        for def in self.abilities.into_values() {
            database.insert_ability(def);
        }
        for (def, _) in self.characters.into_values() {
            database.insert_character(def);
        }
        Ok(database)
    }
}

pub fn compile_def_database(
    app_paths: &AppPaths,
    request: &ContentPlanRequest,
) -> Result<DefDatabase, ContentCompileError> {
    let sources = discover_mod_sources(app_paths, request)
        .map_err(|error| map_discovery_error(error, &app_paths.root))?;

    let mut merged = MergedDefs::default();

    for source in sources {
        let xml_files = collect_xml_files_sorted(&source.source_dir)
            .map_err(|error| read_error(&source.mod_id, error.path, error.source))?;
        let mut seen_in_mod = HashSet::<(&'static str, String)>::new();

        for xml_file in xml_files {
            let raw = fs::read_to_string(&xml_file)
                .map_err(|source_err| read_error(&source.mod_id, xml_file.clone(), source_err))?;
            let defs = parse_defs_document(&source.mod_id, &xml_file, &raw)?;
            for (def, origin) in defs {
                if !seen_in_mod.insert((def.kind(), def.def_name().to_string())) {
                    return Err(origin.error(
                        ContentErrorCode::DuplicateDefInMod,
                        format!(
                            "duplicate {} '{}' in mod '{}'; each mod may define a defName only once",
                            def.kind(),
                            def.def_name(),
                            source.mod_id
                        ),
                    ));
                }
                merged.insert(def, origin);
            }
        }
    }

    merged.resolve()
}

/// One XML file being parsed, carried into every error it produces.
struct XmlFile<'a, 'input> {
    mod_id: &'a str,
    file_path: &'a Path,
    doc: &'a Document<'input>,
}

impl XmlFile<'_, '_> {
    fn location(&self, node: Node<'_, '_>) -> SourceLocation {
        let pos = self.doc.text_pos_at(node.range().start);
        SourceLocation {
            line: pos.row as usize,
            column: pos.col as usize,
        }
    }

    fn error_at(
        &self,
        code: ContentErrorCode,
        message: String,
        node: Node<'_, '_>,
    ) -> ContentCompileError {
        ContentCompileError {
            code,
            message,
            mod_id: self.mod_id.to_string(),
            file_path: self.file_path.to_path_buf(),
            location: Some(self.location(node)),
        }
    }

    fn origin(&self, node: Node<'_, '_>) -> DefOrigin {
        DefOrigin {
            mod_id: self.mod_id.to_string(),
            file_path: self.file_path.to_path_buf(),
            location: self.location(node),
        }
    }

    fn required_text(
        &self,
        node: Node<'_, '_>,
        field_name: &str,
    ) -> Result<String, ContentCompileError> {
        let value = node.text().map(str::trim).unwrap_or_default().to_string();
        if value.is_empty() {
            return Err(self.error_at(
                ContentErrorCode::MissingField,
                format!("field <{}> must not be empty", field_name),
                node,
            ));
        }
        Ok(value)
    }

    fn number(&self, node: Node<'_, '_>, field_name: &str) -> Result<f32, ContentCompileError> {
        let value = self.required_text(node, field_name)?;
        let parsed = value.parse::<f32>().map_err(|_| {
            self.error_at(
                ContentErrorCode::InvalidValue,
                format!("{} '{}' is not a valid number", field_name, value),
                node,
            )
        })?;
        if !parsed.is_finite() {
            return Err(self.error_at(
                ContentErrorCode::InvalidValue,
                format!("{} must be finite", field_name),
                node,
            ));
        }
        Ok(parsed)
    }

    fn boolean(&self, node: Node<'_, '_>, field_name: &str) -> Result<bool, ContentCompileError> {
        let value = self.required_text(node, field_name)?;
        match value.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(self.error_at(
                ContentErrorCode::InvalidValue,
                format!("{} '{}' must be true or false", field_name, value),
                node,
            )),
        }
    }

    fn token<T>(
        &self,
        node: Node<'_, '_>,
        field_name: &str,
        allowed: &str,
        parse: impl FnOnce(&str) -> Option<T>,
    ) -> Result<T, ContentCompileError> {
        let value = self.required_text(node, field_name)?;
        parse(&value).ok_or_else(|| {
            self.error_at(
                ContentErrorCode::InvalidValue,
                format!(
                    "invalid {} '{}'; allowed values: {}",
                    field_name, value, allowed
                ),
                node,
            )
        })
    }

    /// `<li>` children of a list field; anything else is rejected.
    fn list_items<'n, 'i>(
        &self,
        node: Node<'n, 'i>,
        field_name: &str,
    ) -> Result<Vec<Node<'n, 'i>>, ContentCompileError> {
        let mut items = Vec::new();
        for item in node.children().filter(|child| child.is_element()) {
            if item.tag_name().name() != "li" {
                return Err(self.error_at(
                    ContentErrorCode::UnknownField,
                    format!(
                        "unexpected <{}> in <{}>; list entries use <li>",
                        item.tag_name().name(),
                        field_name
                    ),
                    item,
                ));
            }
            items.push(item);
        }
        Ok(items)
    }

    fn text_list(
        &self,
        node: Node<'_, '_>,
        field_name: &str,
    ) -> Result<Vec<String>, ContentCompileError> {
        self.list_items(node, field_name)?
            .into_iter()
            .map(|item| self.required_text(item, field_name))
            .collect()
    }

    fn tag_list(
        &self,
        node: Node<'_, '_>,
        field_name: &str,
    ) -> Result<TagContainer, ContentCompileError> {
        let names = self.text_list(node, field_name)?;
        Ok(TagContainer::from_names(names.iter().map(String::as_str)))
    }

    /// Element children of a def, rejecting repeated field names.
    fn fields<'n, 'i>(
        &self,
        node: Node<'n, 'i>,
        def_kind: &str,
    ) -> Result<Vec<Node<'n, 'i>>, ContentCompileError> {
        let mut seen_fields = HashSet::<&str>::new();
        let mut fields = Vec::new();
        for field in node.children().filter(|child| child.is_element()) {
            let field_name = field.tag_name().name();
            if !seen_fields.insert(field_name) {
                return Err(self.error_at(
                    ContentErrorCode::DuplicateField,
                    format!("duplicate field <{}> in <{}>", field_name, def_kind),
                    field,
                ));
            }
            fields.push(field);
        }
        Ok(fields)
    }

    fn unknown_field(&self, field: Node<'_, '_>, def_kind: &str) -> ContentCompileError {
        self.error_at(
            ContentErrorCode::UnknownField,
            format!("unknown field <{}> in <{}>", field.tag_name().name(), def_kind),
            field,
        )
    }

    fn missing_field(&self, node: Node<'_, '_>, field_name: &str, def_kind: &str) -> ContentCompileError {
        self.error_at(
            ContentErrorCode::MissingField,
            format!("missing required field <{}> in <{}>", field_name, def_kind),
            node,
        )
    }
}

fn parse_defs_document(
    mod_id: &str,
    file_path: &Path,
    raw: &str,
) -> Result<Vec<(ParsedDef, DefOrigin)>, ContentCompileError> {
    let doc = Document::parse(raw).map_err(|error| ContentCompileError {
        code: ContentErrorCode::XmlMalformed,
        message: format!("malformed XML: {error}"),
        mod_id: mod_id.to_string(),
        file_path: file_path.to_path_buf(),
        location: Some(SourceLocation {
            line: error.pos().row as usize,
            column: error.pos().col as usize,
        }),
    })?;
    let file = XmlFile {
        mod_id,
        file_path,
        doc: &doc,
    };

    let root = doc.root_element();
    if root.tag_name().name() != "Defs" {
        return Err(file.error_at(
            ContentErrorCode::InvalidRoot,
            "root element must be <Defs>".to_string(),
            root,
        ));
    }

    let mut defs = Vec::new();
    for child in root.children().filter(|node| node.is_element()) {
        let def = match child.tag_name().name() {
            "EffectDef" => ParsedDef::Effect(parse_effect_def(&file, child)?),
            "AbilityDef" => ParsedDef::Ability(parse_ability_def(&file, child)?),
            "CharacterDef" => ParsedDef::Character(parse_character_def(&file, child)?),
            other => {
                return Err(file.error_at(
                    ContentErrorCode::UnknownDefType,
                    format!(
                        "unsupported def type <{}>; expected <EffectDef>, <AbilityDef> or <CharacterDef>",
                        other
                    ),
                    child,
                ))
            }
        };
        defs.push((def, file.origin(child)));
    }

    Ok(defs)
}

fn parse_effect_def(file: &XmlFile<'_, '_>, node: Node<'_, '_>) -> Result<EffectDef, ContentCompileError> {
    const KIND: &str = "EffectDef";
    let mut def_name: Option<String> = None;
    let mut def = EffectDef::new(String::new());

    for field in file.fields(node, KIND)? {
        match field.tag_name().name() {
            "defName" => def_name = Some(file.required_text(field, "defName")?),
            "duration" => {
                def.duration =
                    file.token(field, "duration", "Instant, Infinite", DurationPolicy::from_token)?;
            }
            "modifiers" => {
                for item in file.list_items(field, "modifiers")? {
                    def.modifiers.push(parse_modifier(file, item)?);
                }
            }
            "grantedTags" => def.granted_tags = file.tag_list(field, "grantedTags")?,
            "assetTags" => def.asset_tags = file.tag_list(field, "assetTags")?,
            _ => return Err(file.unknown_field(field, KIND)),
        }
    }

    let Some(def_name) = def_name else {
        return Err(file.missing_field(node, "defName", KIND));
    };
    def.def_name = def_name;
    Ok(def)
}

fn parse_modifier(
    file: &XmlFile<'_, '_>,
    node: Node<'_, '_>,
) -> Result<AttributeModifier, ContentCompileError> {
    const KIND: &str = "modifiers/li";
    let mut attribute: Option<AttributeKind> = None;
    let mut op: Option<ModifierOp> = None;
    let mut magnitude: Option<f32> = None;
    let mut magnitude_per_level = 0.0;

    for field in file.fields(node, KIND)? {
        match field.tag_name().name() {
            "attribute" => {
                attribute = Some(file.token(
                    field,
                    "attribute",
                    "Health, MaxHealth, Mana, MaxMana, Level",
                    AttributeKind::from_token,
                )?);
            }
            "op" => {
                op = Some(file.token(field, "op", "Add, Multiply, Override", ModifierOp::from_token)?);
            }
            "magnitude" => magnitude = Some(file.number(field, "magnitude")?),
            "magnitudePerLevel" => magnitude_per_level = file.number(field, "magnitudePerLevel")?,
            _ => return Err(file.unknown_field(field, KIND)),
        }
    }

    let Some(attribute) = attribute else {
        return Err(file.missing_field(node, "attribute", KIND));
    };
    let Some(magnitude) = magnitude else {
        return Err(file.missing_field(node, "magnitude", KIND));
    };
    Ok(AttributeModifier::new(attribute, op.unwrap_or(ModifierOp::Add), magnitude)
        .with_per_level(magnitude_per_level))
}

fn parse_ability_def(
    file: &XmlFile<'_, '_>,
    node: Node<'_, '_>,
) -> Result<AbilityDef, ContentCompileError> {
    const KIND: &str = "AbilityDef";
    const IDS: &str = "None, Confirm, Cancel";
    let mut def_name: Option<String> = None;
    let mut def = AbilityDef::new(String::new());

    for field in file.fields(node, KIND)? {
        match field.tag_name().name() {
            "defName" => def_name = Some(file.required_text(field, "defName")?),
            "abilityId" => def.ability_id = file.token(field, "abilityId", IDS, AbilityId::from_token)?,
            "inputId" => def.input_id = file.token(field, "inputId", IDS, AbilityId::from_token)?,
            "activateOnGranted" => {
                def.activate_on_granted = file.boolean(field, "activateOnGranted")?;
            }
            "tags" => def.tags = file.tag_list(field, "tags")?,
            _ => return Err(file.unknown_field(field, KIND)),
        }
    }

    let Some(def_name) = def_name else {
        return Err(file.missing_field(node, "defName", KIND));
    };
    def.class_name = def_name;
    Ok(def)
}

fn parse_character_def(
    file: &XmlFile<'_, '_>,
    node: Node<'_, '_>,
) -> Result<CharacterDef, ContentCompileError> {
    const KIND: &str = "CharacterDef";
    let mut def_name: Option<String> = None;
    let mut label: Option<String> = None;
    let mut def = CharacterDef::default();

    for field in file.fields(node, KIND)? {
        match field.tag_name().name() {
            "defName" => def_name = Some(file.required_text(field, "defName")?),
            "label" => label = Some(file.required_text(field, "label")?),
            "defaultAttributes" => {
                def.default_attributes = Some(file.required_text(field, "defaultAttributes")?);
            }
            "abilities" => def.abilities = file.text_list(field, "abilities")?,
            "startupEffects" => def.startup_effects = file.text_list(field, "startupEffects")?,
            "deathMontage" => def.death_montage = Some(file.required_text(field, "deathMontage")?),
            _ => return Err(file.unknown_field(field, KIND)),
        }
    }

    let Some(def_name) = def_name else {
        return Err(file.missing_field(node, "defName", KIND));
    };
    def.label = label.unwrap_or_else(|| def_name.clone());
    def.def_name = def_name;
    Ok(def)
}

struct ReadError {
    path: PathBuf,
    source: std::io::Error,
}

fn collect_xml_files_sorted(root: &Path) -> Result<Vec<PathBuf>, ReadError> {
    let mut files = Vec::<PathBuf>::new();
    collect_recursive(root, &mut files)?;
    files.sort_by_key(|path| normalize_rel_path(path.strip_prefix(root).unwrap_or(path.as_path())));
    Ok(files)
}

fn collect_recursive(current: &Path, files: &mut Vec<PathBuf>) -> Result<(), ReadError> {
    let entries = fs::read_dir(current).map_err(|source| ReadError {
        path: current.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| ReadError {
            path: current.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_recursive(&path, files)?;
        } else if path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"))
        {
            files.push(path);
        }
    }
    Ok(())
}

fn normalize_rel_path(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn read_error(mod_id: &str, path: PathBuf, source: std::io::Error) -> ContentCompileError {
    ContentCompileError {
        code: ContentErrorCode::ReadFile,
        message: format!("failed to read XML file: {source}"),
        mod_id: mod_id.to_string(),
        file_path: path,
        location: None,
    }
}

fn map_discovery_error(error: ContentPlanError, root: &Path) -> ContentCompileError {
    match error {
        ContentPlanError::EnabledModMissing {
            mod_id,
            expected_dir,
        } => ContentCompileError {
            code: ContentErrorCode::Discovery,
            message: format!(
                "enabled mod '{}' not found at {}; check GAS_ENABLED_MODS",
                mod_id,
                expected_dir.display()
            ),
            mod_id,
            file_path: expected_dir,
            location: None,
        },
        other => ContentCompileError {
            code: ContentErrorCode::Discovery,
            message: other.to_string(),
            mod_id: "<discovery>".to_string(),
            file_path: root.to_path_buf(),
            location: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::tags::GameplayTag;

    fn setup_app_paths(root: &Path) -> AppPaths {
        let base = root.join("assets").join("base");
        let mods = root.join("mods");
        fs::create_dir_all(&base).expect("base");
        fs::create_dir_all(&mods).expect("mods");
        AppPaths {
            root: root.to_path_buf(),
            base_content_dir: base,
            mods_dir: mods,
            scenarios_dir: root.join("assets").join("scenarios"),
        }
    }

    fn write_file(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, content).expect("write");
    }

    fn compile_base(xml: &str) -> Result<DefDatabase, ContentCompileError> {
        let temp = TempDir::new().expect("temp");
        let app = setup_app_paths(temp.path());
        write_file(&app.base_content_dir.join("defs.xml"), xml);
        compile_def_database(&app, &ContentPlanRequest::default())
    }

    const HERO_DEFS: &str = r#"<Defs>
        <EffectDef>
            <defName>GE_HeroDefaults</defName>
            <modifiers>
                <li><attribute>MaxHealth</attribute><op>Override</op><magnitude>100</magnitude><magnitudePerLevel>10</magnitudePerLevel></li>
                <li><attribute>Health</attribute><op>Override</op><magnitude>100</magnitude></li>
            </modifiers>
        </EffectDef>
        <EffectDef>
            <defName>GE_Regen</defName>
            <duration>Infinite</duration>
            <assetTags><li>State.RemoveOnDeath</li></assetTags>
        </EffectDef>
        <AbilityDef>
            <defName>GA_Fireball</defName>
            <abilityId>Confirm</abilityId>
            <inputId>Confirm</inputId>
            <tags><li>Ability.Skill.Fireball</li></tags>
        </AbilityDef>
        <CharacterDef>
            <defName>Hero</defName>
            <label>Hero</label>
            <defaultAttributes>GE_HeroDefaults</defaultAttributes>
            <abilities><li>GA_Fireball</li></abilities>
            <startupEffects><li>GE_Regen</li></startupEffects>
            <deathMontage>AM_HeroDeath</deathMontage>
        </CharacterDef>
    </Defs>"#;

    #[test]
    fn full_character_compiles_with_resolved_references() {
        let db = compile_base(HERO_DEFS).expect("compile");

        let hero = db.character("Hero").expect("hero");
        assert_eq!(hero.default_attributes.as_deref(), Some("GE_HeroDefaults"));
        assert_eq!(hero.abilities, vec!["GA_Fireball".to_string()]);
        assert_eq!(hero.death_montage.as_deref(), Some("AM_HeroDeath"));

        let defaults = db.effect("GE_HeroDefaults").expect("defaults");
        assert_eq!(defaults.duration, DurationPolicy::Instant);
        assert_eq!(defaults.modifiers.len(), 2);
        assert_eq!(defaults.modifiers[0].magnitude_at(2.0), 110.0);

        let regen = db.effect("GE_Regen").expect("regen");
        assert_eq!(regen.duration, DurationPolicy::Infinite);
        assert!(regen
            .asset_tags
            .contains_exact(GameplayTag::request("State.RemoveOnDeath")));

        let fireball = db.ability("GA_Fireball").expect("fireball");
        assert_eq!(fireball.input_id, AbilityId::Confirm);
        assert!(!fireball.activate_on_granted);
    }

    #[test]
    fn missing_def_name_reports_mod_file_and_location() {
        let err = compile_base(r#"<Defs><AbilityDef><inputId>Confirm</inputId></AbilityDef></Defs>"#)
            .expect_err("err");
        assert_eq!(err.code, ContentErrorCode::MissingField);
        assert_eq!(err.mod_id, "base");
        assert!(err
            .file_path
            .ends_with(Path::new("assets").join("base").join("defs.xml")));
        assert!(err.location.is_some());
    }

    #[test]
    fn unknown_field_errors() {
        let err = compile_base(
            r#"<Defs><AbilityDef><defName>a</defName><mood>Happy</mood></AbilityDef></Defs>"#,
        )
        .expect_err("err");
        assert_eq!(err.code, ContentErrorCode::UnknownField);
    }

    #[test]
    fn unknown_def_type_errors() {
        let err = compile_base(r#"<Defs><EntityDef><defName>a</defName></EntityDef></Defs>"#)
            .expect_err("err");
        assert_eq!(err.code, ContentErrorCode::UnknownDefType);
    }

    #[test]
    fn duplicate_field_errors() {
        let err = compile_base(
            r#"<Defs><EffectDef><defName>a</defName><duration>Instant</duration><duration>Infinite</duration></EffectDef></Defs>"#,
        )
        .expect_err("err");
        assert_eq!(err.code, ContentErrorCode::DuplicateField);
    }

    #[test]
    fn invalid_values_error() {
        let bad_op = compile_base(
            r#"<Defs><EffectDef><defName>a</defName><modifiers><li><attribute>Health</attribute><op>Divide</op><magnitude>1</magnitude></li></modifiers></EffectDef></Defs>"#,
        )
        .expect_err("err");
        assert_eq!(bad_op.code, ContentErrorCode::InvalidValue);

        let bad_bool = compile_base(
            r#"<Defs><AbilityDef><defName>a</defName><activateOnGranted>yes</activateOnGranted></AbilityDef></Defs>"#,
        )
        .expect_err("err");
        assert_eq!(bad_bool.code, ContentErrorCode::InvalidValue);

        let bad_number = compile_base(
            r#"<Defs><EffectDef><defName>a</defName><modifiers><li><attribute>Mana</attribute><magnitude>lots</magnitude></li></modifiers></EffectDef></Defs>"#,
        )
        .expect_err("err");
        assert_eq!(bad_number.code, ContentErrorCode::InvalidValue);
    }

    #[test]
    fn list_entries_must_be_li() {
        let err = compile_base(
            r#"<Defs><AbilityDef><defName>a</defName><tags><tag>Ability.X</tag></tags></AbilityDef></Defs>"#,
        )
        .expect_err("err");
        assert_eq!(err.code, ContentErrorCode::UnknownField);
    }

    #[test]
    fn malformed_xml_reports_location() {
        let err = compile_base(r#"<Defs><EffectDef><defName>a</defName></Defs>"#).expect_err("err");
        assert_eq!(err.code, ContentErrorCode::XmlMalformed);
        assert!(err.location.is_some());
    }

    #[test]
    fn invalid_root_errors() {
        let err = compile_base(r#"<Things/>"#).expect_err("err");
        assert_eq!(err.code, ContentErrorCode::InvalidRoot);
    }

    #[test]
    fn same_mod_duplicate_def_errors() {
        let err = compile_base(
            r#"<Defs>
                <EffectDef><defName>a</defName></EffectDef>
                <EffectDef><defName>a</defName></EffectDef>
            </Defs>"#,
        )
        .expect_err("err");
        assert_eq!(err.code, ContentErrorCode::DuplicateDefInMod);
    }

    #[test]
    fn same_name_across_def_kinds_is_allowed() {
        let db = compile_base(
            r#"<Defs>
                <EffectDef><defName>Shared</defName></EffectDef>
                <AbilityDef><defName>Shared</defName></AbilityDef>
            </Defs>"#,
        )
        .expect("compile");
        assert!(db.effect("Shared").is_some());
        assert!(db.ability("Shared").is_some());
    }

    #[test]
    fn unresolved_reference_points_at_character() {
        let err = compile_base(
            r#"<Defs>
    <CharacterDef><defName>Hero</defName><abilities><li>GA_Missing</li></abilities></CharacterDef>
</Defs>"#,
        )
        .expect_err("err");
        assert_eq!(err.code, ContentErrorCode::UnresolvedReference);
        assert!(err.message.contains("GA_Missing"));
        assert_eq!(err.location.map(|location| location.line), Some(2));
    }

    #[test]
    fn cross_mod_duplicate_is_last_mod_wins() {
        let temp = TempDir::new().expect("temp");
        let app = setup_app_paths(temp.path());
        write_file(&app.base_content_dir.join("defs.xml"), HERO_DEFS);
        write_file(
            &app.mods_dir.join("hardcore").join("defs.xml"),
            r#"<Defs><CharacterDef><defName>Hero</defName><label>Hardcore Hero</label><defaultAttributes>GE_HeroDefaults</defaultAttributes></CharacterDef></Defs>"#,
        );
        let db = compile_def_database(
            &app,
            &ContentPlanRequest {
                enabled_mods: vec!["hardcore".to_string()],
            },
        )
        .expect("compile");
        let hero = db.character("Hero").expect("hero");
        assert_eq!(hero.label, "Hardcore Hero");
        assert!(hero.abilities.is_empty());
        assert!(hero.death_montage.is_none());
    }

    #[test]
    fn missing_enabled_mod_is_a_discovery_error() {
        let temp = TempDir::new().expect("temp");
        let app = setup_app_paths(temp.path());
        let err = compile_def_database(
            &app,
            &ContentPlanRequest {
                enabled_mods: vec!["ghost".to_string()],
            },
        )
        .expect_err("err");
        assert_eq!(err.code, ContentErrorCode::Discovery);
        assert_eq!(err.mod_id, "ghost");
    }

    #[test]
    fn label_defaults_to_def_name() {
        let db = compile_base(r#"<Defs><CharacterDef><defName>Minion</defName></CharacterDef></Defs>"#)
            .expect("compile");
        assert_eq!(db.character("Minion").expect("minion").label, "Minion");
    }
}
