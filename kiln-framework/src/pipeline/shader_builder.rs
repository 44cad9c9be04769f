use super::ShaderProperties;
use fnv::FnvHashMap;
use kiln_api::{RhiError, RhiResult};
use kiln_base::{AssetId, StringId};
use std::sync::Arc;

// Guards against pieces that include or insert themselves
const MAXIMUM_NESTING_DEPTH: u32 = 8;

/// Supplies the raw text of shader blueprints and shader pieces. Implemented on top of the loaded
/// shader resources so the builder thread never touches files.
pub trait ShaderSourceProvider: Send + Sync {
    fn shader_blueprint_source(
        &self,
        asset_id: AssetId,
    ) -> Option<String>;

    fn shader_piece_source(
        &self,
        asset_id: AssetId,
    ) -> Option<String>;

    /// A blueprint is ready once it and every piece it includes finished loading
    fn is_shader_blueprint_ready(
        &self,
        asset_id: AssetId,
    ) -> bool {
        self.shader_blueprint_source(asset_id).is_some()
    }
}

/// The final source of one shader stage and every asset that contributed to it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildShader {
    pub source_code: String,
    pub included_asset_ids: Vec<AssetId>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum DirectiveKind {
    IncludePiece,
    Piece,
    InsertPiece,
    Property,
    Value,
    Else,
    End,
}

impl DirectiveKind {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "includepiece" => DirectiveKind::IncludePiece,
            "piece" => DirectiveKind::Piece,
            "insertpiece" => DirectiveKind::InsertPiece,
            "property" => DirectiveKind::Property,
            "value" => DirectiveKind::Value,
            "else" => DirectiveKind::Else,
            "end" => DirectiveKind::End,
            _ => return None,
        })
    }

    fn takes_argument(self) -> bool {
        !matches!(self, DirectiveKind::Else | DirectiveKind::End)
    }
}

enum Token<'a> {
    Text(&'a str),
    Directive {
        kind: DirectiveKind,
        argument: &'a str,
        line: usize,
    },
}

#[derive(Clone, Debug)]
enum Node {
    Text(String),
    IncludePiece(String),
    Piece {
        name: String,
        body: Vec<Node>,
    },
    InsertPiece(String),
    Property {
        property_id: StringId,
        negate: bool,
        then_nodes: Vec<Node>,
        else_nodes: Vec<Node>,
    },
    Value(StringId),
}

fn line_of(
    source: &str,
    offset: usize,
) -> usize {
    source[..offset].matches('\n').count() + 1
}

// '@' followed by anything that isn't a known directive stays part of the text
fn tokenize(source: &str) -> RhiResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut text_start = 0;
    let mut position = 0;

    while let Some(offset) = source[position..].find('@') {
        let at = position + offset;
        let name_start = at + 1;
        let name_end = source[name_start..]
            .find(|c: char| !c.is_ascii_alphanumeric())
            .map(|x| name_start + x)
            .unwrap_or_else(|| source.len());

        let kind = match DirectiveKind::from_name(&source[name_start..name_end]) {
            Some(kind) => kind,
            None => {
                position = name_start;
                continue;
            }
        };

        let line = line_of(source, at);
        let (argument, end) = if kind.takes_argument() {
            if !source[name_end..].starts_with('(') {
                return Err(RhiError::from(format!(
                    "({}): @{} expects an argument in parentheses",
                    line,
                    &source[name_start..name_end]
                )));
            }
            let close = source[name_end..].find(')').ok_or_else(|| {
                RhiError::from(format!("({}): unterminated directive argument", line))
            })? + name_end;
            (source[name_end + 1..close].trim(), close + 1)
        } else {
            ("", name_end)
        };

        if text_start < at {
            tokens.push(Token::Text(&source[text_start..at]));
        }
        tokens.push(Token::Directive {
            kind,
            argument,
            line,
        });
        text_start = end;
        position = end;
    }

    if text_start < source.len() {
        tokens.push(Token::Text(&source[text_start..]));
    }

    Ok(tokens)
}

// Returns the parsed nodes and the @else/@end that closed the block, if any
fn parse_nodes(
    tokens: &[Token],
    cursor: &mut usize,
    inside_block: bool,
) -> RhiResult<(Vec<Node>, Option<(DirectiveKind, usize)>)> {
    let mut nodes = Vec::new();
    while *cursor < tokens.len() {
        let token = &tokens[*cursor];
        *cursor += 1;

        let (kind, argument, line) = match token {
            Token::Text(text) => {
                nodes.push(Node::Text(text.to_string()));
                continue;
            }
            Token::Directive {
                kind,
                argument,
                line,
            } => (*kind, *argument, *line),
        };

        match kind {
            DirectiveKind::IncludePiece => nodes.push(Node::IncludePiece(argument.to_string())),
            DirectiveKind::InsertPiece => nodes.push(Node::InsertPiece(argument.to_string())),
            DirectiveKind::Value => nodes.push(Node::Value(StringId::new(argument))),
            DirectiveKind::Piece => {
                let (body, terminator) = parse_nodes(tokens, cursor, true)?;
                match terminator {
                    Some((DirectiveKind::End, _)) => {}
                    _ => {
                        return Err(RhiError::from(format!(
                            "({}): @piece({}) must be closed by @end",
                            line, argument
                        )))
                    }
                }
                nodes.push(Node::Piece {
                    name: argument.to_string(),
                    body,
                });
            }
            DirectiveKind::Property => {
                let (negate, name) = match argument.strip_prefix('!') {
                    Some(name) => (true, name.trim()),
                    None => (false, argument),
                };
                let (then_nodes, terminator) = parse_nodes(tokens, cursor, true)?;
                let else_nodes = match terminator {
                    Some((DirectiveKind::End, _)) => Vec::new(),
                    Some((DirectiveKind::Else, else_line)) => {
                        let (else_nodes, terminator) = parse_nodes(tokens, cursor, true)?;
                        if !matches!(terminator, Some((DirectiveKind::End, _))) {
                            return Err(RhiError::from(format!(
                                "({}): @else must be closed by @end",
                                else_line
                            )));
                        }
                        else_nodes
                    }
                    _ => {
                        return Err(RhiError::from(format!(
                            "({}): @property({}) must be closed by @end",
                            line, argument
                        )))
                    }
                };
                nodes.push(Node::Property {
                    property_id: StringId::new(name),
                    negate,
                    then_nodes,
                    else_nodes,
                });
            }
            DirectiveKind::Else | DirectiveKind::End => {
                if inside_block {
                    return Ok((nodes, Some((kind, line))));
                }
                return Err(RhiError::from(format!(
                    "({}): unexpected @{} outside of a block",
                    line,
                    if kind == DirectiveKind::Else {
                        "else"
                    } else {
                        "end"
                    }
                )));
            }
        }
    }

    Ok((nodes, None))
}

fn parse(source: &str) -> RhiResult<Vec<Node>> {
    let tokens = tokenize(source)?;
    let mut cursor = 0;
    let (nodes, _) = parse_nodes(&tokens, &mut cursor, false)?;
    Ok(nodes)
}

struct BuildContext<'a> {
    source_provider: &'a dyn ShaderSourceProvider,
    properties: &'a ShaderProperties,
    pieces: FnvHashMap<String, Vec<Node>>,
    included_asset_ids: Vec<AssetId>,
    output: String,
}

impl<'a> BuildContext<'a> {
    fn evaluate(
        &mut self,
        nodes: &[Node],
        depth: u32,
    ) -> RhiResult<()> {
        if depth > MAXIMUM_NESTING_DEPTH {
            return Err("Shader pieces are nested too deeply, check for cyclic includes".into());
        }

        for node in nodes {
            match node {
                Node::Text(text) => self.output.push_str(text),
                Node::IncludePiece(virtual_path) => {
                    let asset_id = AssetId::from_virtual_path(virtual_path);
                    let source = self
                        .source_provider
                        .shader_piece_source(asset_id)
                        .ok_or_else(|| {
                            RhiError::SourceNotReady(format!(
                                "Shader piece {} ({:?}) is not available",
                                virtual_path, asset_id
                            ))
                        })?;
                    if !self.included_asset_ids.contains(&asset_id) {
                        self.included_asset_ids.push(asset_id);
                    }
                    let included = parse(&source)?;
                    self.evaluate(&included, depth + 1)?;
                }
                Node::Piece { name, body } => {
                    self.pieces.insert(name.clone(), body.clone());
                }
                Node::InsertPiece(name) => {
                    let body = self.pieces.get(name).cloned().ok_or_else(|| {
                        RhiError::from(format!("@insertpiece({}) names an unknown piece", name))
                    })?;
                    self.evaluate(&body, depth + 1)?;
                }
                Node::Property {
                    property_id,
                    negate,
                    then_nodes,
                    else_nodes,
                } => {
                    let is_set = self.properties.get_property_value(*property_id) != 0;
                    if is_set != *negate {
                        self.evaluate(then_nodes, depth)?;
                    } else {
                        self.evaluate(else_nodes, depth)?;
                    }
                }
                Node::Value(property_id) => {
                    let value = self.properties.get_property_value(*property_id);
                    self.output.push_str(&value.to_string());
                }
            }
        }

        Ok(())
    }
}

/// Turns a shader blueprint plus a property set into final shader source by expanding the
/// builder directives.
#[derive(Clone)]
pub struct ShaderBuilder {
    source_provider: Arc<dyn ShaderSourceProvider>,
}

impl ShaderBuilder {
    pub fn new(source_provider: Arc<dyn ShaderSourceProvider>) -> Self {
        ShaderBuilder { source_provider }
    }

    pub fn source_provider(&self) -> &Arc<dyn ShaderSourceProvider> {
        &self.source_provider
    }

    #[profiling::function]
    pub fn create_source_code(
        &self,
        shader_blueprint_asset_id: AssetId,
        properties: &ShaderProperties,
    ) -> RhiResult<BuildShader> {
        let blueprint_source = self
            .source_provider
            .shader_blueprint_source(shader_blueprint_asset_id)
            .ok_or_else(|| {
                RhiError::SourceNotReady(format!(
                    "Shader blueprint {:?} is not available",
                    shader_blueprint_asset_id
                ))
            })?;

        let nodes = parse(&blueprint_source).map_err(|error| {
            RhiError::from(format!(
                "Shader blueprint {:?}: {}",
                shader_blueprint_asset_id, error
            ))
        })?;

        let mut context = BuildContext {
            source_provider: self.source_provider.as_ref(),
            properties,
            pieces: Default::default(),
            included_asset_ids: vec![shader_blueprint_asset_id],
            output: String::with_capacity(blueprint_source.len()),
        };
        context.evaluate(&nodes, 0)?;

        Ok(BuildShader {
            source_code: context.output,
            included_asset_ids: context.included_asset_ids,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct TestShaderSourceProvider {
        blueprints: Mutex<FnvHashMap<AssetId, String>>,
        pieces: Mutex<FnvHashMap<AssetId, String>>,
    }

    impl TestShaderSourceProvider {
        pub(crate) fn add_blueprint(
            &self,
            virtual_path: &str,
            source: &str,
        ) -> AssetId {
            let asset_id = AssetId::from_virtual_path(virtual_path);
            self.blueprints
                .lock()
                .unwrap()
                .insert(asset_id, source.to_string());
            asset_id
        }

        pub(crate) fn add_piece(
            &self,
            virtual_path: &str,
            source: &str,
        ) {
            self.pieces
                .lock()
                .unwrap()
                .insert(AssetId::from_virtual_path(virtual_path), source.to_string());
        }
    }

    impl ShaderSourceProvider for TestShaderSourceProvider {
        fn shader_blueprint_source(
            &self,
            asset_id: AssetId,
        ) -> Option<String> {
            self.blueprints.lock().unwrap().get(&asset_id).cloned()
        }

        fn shader_piece_source(
            &self,
            asset_id: AssetId,
        ) -> Option<String> {
            self.pieces.lock().unwrap().get(&asset_id).cloned()
        }
    }

    fn build(
        provider: Arc<TestShaderSourceProvider>,
        asset_id: AssetId,
        properties: &ShaderProperties,
    ) -> RhiResult<BuildShader> {
        ShaderBuilder::new(provider).create_source_code(asset_id, properties)
    }

    #[test]
    fn test_plain_source_passes_through() {
        let provider = Arc::new(TestShaderSourceProvider::default());
        let asset_id = provider.add_blueprint("Shaders/Plain.asset", "void main() { x@y; }");
        let shader = build(provider, asset_id, &ShaderProperties::new()).unwrap();
        assert_eq!(shader.source_code, "void main() { x@y; }");
        assert_eq!(shader.included_asset_ids, vec![asset_id]);
    }

    #[test]
    fn test_properties_and_values() {
        let provider = Arc::new(TestShaderSourceProvider::default());
        let asset_id = provider.add_blueprint(
            "Shaders/Lit.asset",
            "@property(UseSkinning)skinned@else@property(!UseMorph)static@end@end lights=@value(NumberOfLights)",
        );

        let skinned = ShaderProperties::new()
            .with_property(StringId::new("UseSkinning"), 1)
            .with_property(StringId::new("NumberOfLights"), 3);
        assert_eq!(
            build(provider.clone(), asset_id, &skinned)
                .unwrap()
                .source_code,
            "skinned lights=3"
        );

        assert_eq!(
            build(provider.clone(), asset_id, &ShaderProperties::new())
                .unwrap()
                .source_code,
            "static lights=0"
        );

        let morph = ShaderProperties::new().with_property(StringId::new("UseMorph"), 1);
        assert_eq!(
            build(provider, asset_id, &morph).unwrap().source_code,
            " lights=0"
        );
    }

    #[test]
    fn test_pieces_from_included_files() {
        let provider = Arc::new(TestShaderSourceProvider::default());
        provider.add_piece(
            "Pieces/Core.asset",
            "@piece(Header)#version 450\n@end@piece(Body)color = 1.0;@end",
        );
        let asset_id = provider.add_blueprint(
            "Shaders/Unlit.asset",
            "@includepiece(Pieces/Core.asset)@insertpiece(Header)void main() { @insertpiece(Body) }",
        );

        let shader = build(provider, asset_id, &ShaderProperties::new()).unwrap();
        assert_eq!(
            shader.source_code,
            "#version 450\nvoid main() { color = 1.0; }"
        );
        assert_eq!(
            shader.included_asset_ids,
            vec![asset_id, AssetId::from_virtual_path("Pieces/Core")]
        );
    }

    #[test]
    fn test_errors() {
        let provider = Arc::new(TestShaderSourceProvider::default());
        let unknown_piece = provider.add_blueprint("Shaders/A.asset", "@insertpiece(Missing)");
        let missing_include = provider.add_blueprint("Shaders/B.asset", "@includepiece(Nope)");
        let unbalanced = provider.add_blueprint("Shaders/C.asset", "@property(X) never closed");
        let stray_end = provider.add_blueprint("Shaders/D.asset", "text\n@end");
        provider.add_piece("Pieces/Cycle.asset", "@includepiece(Pieces/Cycle.asset)");
        let cyclic = provider.add_blueprint("Shaders/E.asset", "@includepiece(Pieces/Cycle.asset)");

        let properties = ShaderProperties::new();
        for asset_id in &[unknown_piece, missing_include, unbalanced, cyclic] {
            assert!(build(provider.clone(), *asset_id, &properties).is_err());
        }

        let error = build(provider.clone(), stray_end, &properties).unwrap_err();
        assert!(error.to_string().contains("(2)"));

        // Sources that aren't loaded are retryable, broken sources are not
        assert!(matches!(
            build(provider.clone(), missing_include, &properties),
            Err(RhiError::SourceNotReady(_))
        ));
        assert!(matches!(
            build(provider.clone(), AssetId::from_virtual_path("Nothing"), &properties),
            Err(RhiError::SourceNotReady(_))
        ));
        assert!(!matches!(
            build(provider, unknown_piece, &properties),
            Err(RhiError::SourceNotReady(_))
        ));
    }
}
