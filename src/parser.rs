use nom::{
    branch::alt,
    bytes::complete::{take_while1},
    character::complete::{alpha1, char, digit1, multispace0},
    combinator::{all_consuming, map, map_res},
    multi::many0,
    sequence::{preceded, separated_pair, terminated},
    IResult,
};
use regex::Regex;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use anyhow::{anyhow, bail, Context, Result};

use crate::archetype::PinSelector;
use crate::net::{ConnectDirection, PinRole};
use crate::pin::PinType;
use crate::provenance::Provenance;
use crate::trace::{
    ArchetypeDecl, EndpointRef, PartDecl, PinDecl, TargetRef, Trace, TraceOp, TraceStatement,
};

lazy_static! {
    static ref IDENTIFIER_PATTERN: Regex = Regex::new(
        r"^[A-Za-z_][A-Za-z0-9_]*$"
    ).unwrap();

    static ref PIN_REF_PATTERN: Regex = Regex::new(
        r"^([A-Za-z_][A-Za-z0-9_]*)\.(\S+)$"
    ).unwrap();

    static ref NET_NAME_PATTERN: Regex = Regex::new(
        r"^\$?[^\s.&$@=]+$"
    ).unwrap();
}

/// One whitespace separated token of a directive
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    Option(&'a str, &'a str),
    Location(&'a str, usize),
    Word(&'a str),
}

/// Reader for netbind trace files
pub struct TraceParser;

impl Default for TraceParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceParser {
    pub fn new() -> Self {
        TraceParser
    }

    pub fn parse_trace(&self, content: &str) -> Result<Trace> {
        self.parse_source(content, None)
    }

    /// Parse trace text; provenance of every statement points into `source`
    pub fn parse_source(&self, content: &str, source: Option<&Path>) -> Result<Trace> {
        let mut builder = TraceBuilder::new(source);

        for (line_num, line) in self.preprocess_lines(content) {
            if line.eq_ignore_ascii_case(".end") {
                break;
            }

            // The first line that isn't a directive is the title
            if !line.starts_with('.') {
                if builder.trace.title.is_empty() && builder.trace.statements.is_empty() {
                    builder.trace.title = line;
                    continue;
                }
                bail!("{}: expected a directive, found '{}'", builder.location(line_num), line);
            }

            builder
                .directive(line_num, &line)
                .with_context(|| format!("{}: '{}'", builder.location(line_num), line))?;
        }

        Ok(builder.trace)
    }

    /// Join continuation lines and drop comments, keeping the first line number
    fn preprocess_lines(&self, content: &str) -> Vec<(usize, String)> {
        let mut processed_lines = Vec::new();
        let mut current: Option<(usize, String)> = None;

        for (index, line) in content.lines().enumerate() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('*') || line.starts_with(';') {
                continue;
            }

            if let Some(rest) = line.strip_prefix('+') {
                if let Some((_, current_line)) = current.as_mut() {
                    current_line.push(' ');
                    current_line.push_str(rest.trim());
                    continue;
                }
            }

            if let Some(done) = current.replace((index + 1, line.to_string())) {
                processed_lines.push(done);
            }
        }

        processed_lines.extend(current);
        processed_lines
    }
}

struct TraceBuilder {
    trace: Trace,
    archetype_index: HashMap<String, usize>,
}

impl TraceBuilder {
    fn new(source: Option<&Path>) -> Self {
        TraceBuilder {
            trace: Trace {
                source: source.map(Path::to_path_buf),
                ..Default::default()
            },
            archetype_index: HashMap::new(),
        }
    }

    fn location(&self, line: usize) -> String {
        match &self.trace.source {
            Some(path) => format!("{}:{}", path.display(), line),
            None => format!("line {}", line),
        }
    }

    fn provenance(&self, line: usize, location: Option<(&str, usize)>) -> Provenance {
        match (location, &self.trace.source) {
            (Some((file, line)), _) => Provenance::at(PathBuf::from(file), line),
            (None, Some(source)) => Provenance::at(source.clone(), line),
            (None, None) => Provenance {
                line: Some(line),
                ..Default::default()
            },
        }
    }

    fn push(&mut self, line: usize, op: TraceOp, provenance: Provenance) {
        self.trace.statements.push(TraceStatement {
            op,
            line,
            provenance,
        });
    }

    fn directive(&mut self, line_num: usize, line: &str) -> Result<()> {
        let (_, (name, tokens)) = parse_directive(line)
            .map_err(|e| anyhow!("malformed directive: {}", e))?;
        let mut args = Arguments::new(tokens);

        match name.to_ascii_lowercase().as_str() {
            "archetype" => self.archetype(line_num, &mut args)?,
            "pin" => self.pin(&mut args)?,
            "part" => self.part(line_num, &mut args)?,
            "net" => self.net(line_num, &mut args)?,
            "connect" => self.connect(line_num, &mut args)?,
            other => bail!("unknown directive .{}", other),
        }
        args.finish()
    }

    fn archetype(&mut self, line_num: usize, args: &mut Arguments) -> Result<()> {
        let name = args.word("archetype name")?;
        if self.archetype_index.contains_key(name) {
            bail!("archetype {} is declared twice", name);
        }

        let mut decl = ArchetypeDecl::new(name, line_num);
        decl.extends = args.option("extends").map(str::to_string);
        decl.prefix = args.option("prefix").map(str::to_uppercase);
        decl.value_suffix = args.option("suffix").map(str::to_string);
        decl.part_number = args.option("part_number").map(str::to_string);
        if let Some(select) = args.option("select") {
            decl.selector = Some(
                PinSelector::parse(select).ok_or_else(|| anyhow!("unknown pin selector '{}'", select))?,
            );
        }

        self.archetype_index
            .insert(decl.name.clone(), self.trace.archetypes.len());
        self.trace.archetypes.push(decl);
        Ok(())
    }

    fn pin(&mut self, args: &mut Arguments) -> Result<()> {
        let archetype = args.word("archetype name")?;
        let index = *self
            .archetype_index
            .get(archetype)
            .ok_or_else(|| anyhow!("pins can only be added to archetypes declared in this trace, not {}", archetype))?;

        let names = split_list(args.word("pin names")?);
        if names.is_empty() {
            bail!("pin needs at least one name");
        }
        let numbers = args.option("numbers").map(split_list).unwrap_or_default();
        let pin_type = match args.option("type") {
            Some(text) => Some(PinType::parse(text).ok_or_else(|| anyhow!("unknown pin type '{}'", text))?),
            None => None,
        };
        let well = args.option("well").map(str::to_string);

        self.trace.archetypes[index].pins.push(PinDecl {
            names,
            numbers,
            pin_type,
            well,
        });
        Ok(())
    }

    fn part(&mut self, line_num: usize, args: &mut Arguments) -> Result<()> {
        let var = args.word("variable name")?;
        if !IDENTIFIER_PATTERN.is_match(var) {
            bail!("'{}' is not a valid variable name", var);
        }
        let archetype = args.word("archetype name")?;

        let part = PartDecl {
            var: var.to_string(),
            archetype: archetype.to_string(),
            designator: args.option("refdes").map(str::to_string),
            value: args.option("value").map(str::to_string),
            part_number: args.option("part_number").map(str::to_string),
            populated: !args.flag("dns"),
            reversed: args.flag("reversed"),
            to: args.option("to").map(str::to_string),
        };
        let provenance = self.provenance(line_num, args.location()).with_name(var);
        self.push(line_num, TraceOp::CreateComponent(part), provenance);
        Ok(())
    }

    fn net(&mut self, line_num: usize, args: &mut Arguments) -> Result<()> {
        let name = args.word("net name")?;
        if !NET_NAME_PATTERN.is_match(name) {
            bail!("'{}' is not a valid net name", name);
        }
        let provenance = self
            .provenance(line_num, args.location())
            .with_name(name.trim_start_matches('$'));
        self.push(
            line_num,
            TraceOp::CreateNet {
                name: name.to_string(),
            },
            provenance,
        );
        Ok(())
    }

    fn connect(&mut self, line_num: usize, args: &mut Arguments) -> Result<()> {
        let target = match args.word("connection target")? {
            word if word.starts_with('$') => TargetRef::Net(word.to_string()),
            word => match pin_ref(word) {
                Some((var, pin)) => TargetRef::Pin { var, pin },
                None => TargetRef::Net(word.to_string()),
            },
        };
        let role = match args.option("role") {
            None => PinRole::Primary,
            Some(role) if role.eq_ignore_ascii_case("primary") => PinRole::Primary,
            Some(role) if role.eq_ignore_ascii_case("secondary") => PinRole::Secondary,
            Some(role) => bail!("unknown pin role '{}'", role),
        };

        let mut segments = Vec::new();
        let mut direction = ConnectDirection::Unknown;
        let mut endpoints = Vec::new();
        for word in args.rest() {
            let next = match word.to_ascii_lowercase().as_str() {
                "in" => Some(ConnectDirection::In),
                "out" => Some(ConnectDirection::Out),
                "any" => Some(ConnectDirection::Unknown),
                _ => None,
            };
            match next {
                Some(next) => {
                    if !endpoints.is_empty() {
                        segments.push((direction, std::mem::take(&mut endpoints)));
                    }
                    direction = next;
                }
                None => endpoints.push(endpoint_ref(word)),
            }
        }
        if !endpoints.is_empty() {
            segments.push((direction, endpoints));
        }
        if segments.is_empty() {
            bail!("connect needs at least one endpoint");
        }

        let provenance = self.provenance(line_num, args.location());
        self.push(
            line_num,
            TraceOp::Connect {
                target,
                segments,
                role,
            },
            provenance,
        );
        Ok(())
    }
}

/// Tokens of one directive, consumed by the directive handlers
struct Arguments<'a> {
    words: Vec<&'a str>,
    options: Vec<(&'a str, &'a str)>,
    location: Option<(&'a str, usize)>,
}

impl<'a> Arguments<'a> {
    fn new(tokens: Vec<Token<'a>>) -> Self {
        let mut args = Arguments {
            words: Vec::new(),
            options: Vec::new(),
            location: None,
        };
        for token in tokens {
            match token {
                Token::Word(word) => args.words.push(word),
                Token::Option(key, value) => args.options.push((key, value)),
                Token::Location(file, line) => args.location = Some((file, line)),
            }
        }
        args
    }

    fn word(&mut self, what: &str) -> Result<&'a str> {
        if self.words.is_empty() {
            bail!("missing {}", what);
        }
        Ok(self.words.remove(0))
    }

    fn rest(&mut self) -> Vec<&'a str> {
        std::mem::take(&mut self.words)
    }

    fn flag(&mut self, name: &str) -> bool {
        match self.words.iter().position(|w| w.eq_ignore_ascii_case(name)) {
            Some(index) => {
                self.words.remove(index);
                true
            }
            None => false,
        }
    }

    fn option(&mut self, key: &str) -> Option<&'a str> {
        let index = self.options.iter().position(|(k, _)| k.eq_ignore_ascii_case(key))?;
        Some(self.options.remove(index).1)
    }

    fn location(&mut self) -> Option<(&'a str, usize)> {
        self.location.take()
    }

    /// Anything left over was not understood
    fn finish(self) -> Result<()> {
        if let Some(word) = self.words.first() {
            bail!("unexpected argument '{}'", word);
        }
        if let Some((key, _)) = self.options.first() {
            bail!("unknown option '{}'", key);
        }
        if self.location.is_some() {
            bail!("this directive doesn't take a location");
        }
        Ok(())
    }
}

fn split_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn pin_ref(word: &str) -> Option<(String, String)> {
    PIN_REF_PATTERN
        .captures(word)
        .map(|captures| (captures[1].to_string(), captures[2].to_string()))
}

fn endpoint_ref(word: &str) -> EndpointRef {
    if let Some(net) = word.strip_prefix('&') {
        return EndpointRef::Net(net.to_string());
    }
    match pin_ref(word) {
        Some((var, pin)) => EndpointRef::Pin { var, pin },
        None => EndpointRef::Component(word.to_string()),
    }
}

// Tokenizer using nom
fn parse_directive(input: &str) -> IResult<&str, (&str, Vec<Token<'_>>)> {
    let (input, name) = preceded(char('.'), alpha1)(input)?;
    let (input, tokens) = all_consuming(terminated(many0(preceded(multispace0, parse_token)), multispace0))(input)?;
    Ok((input, (name, tokens)))
}

fn parse_token(input: &str) -> IResult<&str, Token<'_>> {
    alt((parse_option, parse_location, parse_word))(input)
}

fn parse_option(input: &str) -> IResult<&str, Token<'_>> {
    map(
        separated_pair(
            take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_'),
            char('='),
            take_while1(|c: char| !c.is_whitespace()),
        ),
        |(key, value)| Token::Option(key, value),
    )(input)
}

fn parse_location(input: &str) -> IResult<&str, Token<'_>> {
    map(
        preceded(
            char('@'),
            separated_pair(
                take_while1(|c: char| c != ':' && !c.is_whitespace()),
                char(':'),
                map_res(digit1, str::parse::<usize>),
            ),
        ),
        |(file, line)| Token::Location(file, line),
    )(input)
}

fn parse_word(input: &str) -> IResult<&str, Token<'_>> {
    map(take_while1(|c: char| !c.is_whitespace()), Token::Word)(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_lines() {
        let parser = TraceParser::new();
        let content = "Power board\n* comment\n\n.part r1 R\n+ value=10k\n; another\n.end";

        let lines = parser.preprocess_lines(content);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], (1, "Power board".to_string()));
        assert_eq!(lines[1], (4, ".part r1 R value=10k".to_string()));
        assert_eq!(lines[2], (7, ".end".to_string()));
    }

    #[test]
    fn test_tokens() {
        let (_, (name, tokens)) = parse_directive(".part r1 R value=4.7k dns @lib/board.py:42").unwrap();
        assert_eq!(name, "part");
        assert_eq!(
            tokens,
            vec![
                Token::Word("r1"),
                Token::Word("R"),
                Token::Option("value", "4.7k"),
                Token::Word("dns"),
                Token::Location("lib/board.py", 42),
            ]
        );
    }

    #[test]
    fn test_parse_trace() {
        let content = "\
LED driver
.archetype Regulator prefix=u select=match-net:PP_
.pin Regulator VIN,IN numbers=1 type=power-in
.pin Regulator EN numbers=2 well=VIN
.net PP3300
.net $led_anode @board.py:30
.part u1 Regulator part_number=TLV733
.part r_led R value=330 to=GND reversed
.part led LED refdes=LED9 dns
.connect PP3300 u1 in r_led.1
+ out led.A role=secondary
.connect r_led.2 &GND led
.end
this is ignored
";
        let trace = TraceParser::new().parse_trace(content).unwrap();
        assert_eq!(trace.title, "LED driver");

        let regulator = &trace.archetypes[0];
        assert_eq!(regulator.prefix.as_deref(), Some("U"));
        assert_eq!(
            regulator.selector,
            Some(PinSelector::NameMatchesNet {
                prefix: "PP_".to_string()
            })
        );
        assert_eq!(regulator.pins.len(), 2);
        assert_eq!(regulator.pins[0].names, vec!["VIN", "IN"]);
        assert_eq!(regulator.pins[0].pin_type, Some(PinType::PowerIn));
        assert_eq!(regulator.pins[1].well.as_deref(), Some("VIN"));

        assert_eq!(trace.statements.len(), 7);
        let anode = &trace.statements[1];
        assert_eq!(anode.provenance, Provenance::at("board.py", 30).with_name("led_anode"));

        match &trace.statements[3].op {
            TraceOp::CreateComponent(part) => {
                assert_eq!(part.var, "r_led");
                assert_eq!(part.to.as_deref(), Some("GND"));
                assert!(part.reversed);
                assert!(part.populated);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(trace.statements[3].provenance.name.as_deref(), Some("r_led"));
        assert_eq!(trace.statements[3].provenance.line, Some(8));

        match &trace.statements[5].op {
            TraceOp::Connect {
                target,
                segments,
                role,
            } => {
                assert_eq!(target, &TargetRef::Net("PP3300".to_string()));
                assert_eq!(*role, PinRole::Secondary);
                assert_eq!(segments.len(), 3);
                assert_eq!(segments[0], (ConnectDirection::Unknown, vec![EndpointRef::Component("u1".to_string())]));
                assert_eq!(segments[1].0, ConnectDirection::In);
                assert_eq!(
                    segments[2],
                    (
                        ConnectDirection::Out,
                        vec![EndpointRef::Pin {
                            var: "led".to_string(),
                            pin: "A".to_string()
                        }]
                    )
                );
            }
            other => panic!("unexpected {:?}", other),
        }

        match &trace.statements[6].op {
            TraceOp::Connect { target, segments, .. } => {
                assert_eq!(
                    target,
                    &TargetRef::Pin {
                        var: "r_led".to_string(),
                        pin: "2".to_string()
                    }
                );
                assert_eq!(segments[0].1[0], EndpointRef::Net("GND".to_string()));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_source_file_provenance() {
        let trace = TraceParser::new()
            .parse_source("Title\n\n.part c1 C value=1u\n", Some(Path::new("board.trace")))
            .unwrap();
        assert_eq!(
            trace.statements[0].provenance,
            Provenance::at("board.trace", 3).with_name("c1")
        );
    }

    #[test]
    fn test_rejects_bad_lines() {
        let parser = TraceParser::new();
        assert!(parser.parse_trace("T\n.bogus x\n").is_err());
        assert!(parser.parse_trace("T\n.part r1 R colour=red\n").is_err());
        assert!(parser.parse_trace("T\n.part 1r R\n").is_err());
        assert!(parser.parse_trace("T\n.pin R P3\n").is_err());
        assert!(parser.parse_trace("T\n.connect VCC\n").is_err());
        assert!(parser.parse_trace("T\n.net VCC\nstray text\n").is_err());
        assert!(parser.parse_trace("T\n.archetype X select=sideways\n").is_err());

        let err = parser.parse_trace("T\n.part r1 R\n.part r2\n").unwrap_err();
        assert!(format!("{:#}", err).contains("line 3"));
    }
}
