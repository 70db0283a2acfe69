//! Textual IR parser.
//!
//! The format is line oriented:
//!
//! ```text
//! ; comment
//! fn bar(%i) {
//! entry:
//!     %one = ldi 1
//!     %r = add %i, %one
//!     retr %r
//! }
//! ```
//!
//! Value and block names may be used before their definition; everything is
//! resolved once the whole function has been read.

use super::{BinOp, BlockId, Callee, Function, FunctionBuilder, Op, Program, ValueId};
use hashbrown::HashMap;
use thiserror::Error;

/// Parse failure with the 1-based line it was detected on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

type ParseResult<T> = Result<T, ParseError>;

/// Parse a whole program.
pub fn parse(text: &str) -> ParseResult<Program> {
    let raw = Parser::new(text).parse()?;
    let mut program = Program::new();
    for function in raw {
        let line = function.line;
        let function = function.resolve()?;
        program
            .add_function(function)
            .map_err(|err| ParseError::new(line, err.to_string()))?;
    }
    Ok(program)
}

#[derive(Debug)]
struct RawInst<'a> {
    line: usize,
    dest: Option<&'a str>,
    mnemonic: &'a str,
    args: Vec<&'a str>,
}

#[derive(Debug)]
struct RawBlock<'a> {
    name: &'a str,
    line: usize,
    insts: Vec<RawInst<'a>>,
}

#[derive(Debug)]
struct RawFunction<'a> {
    name: &'a str,
    line: usize,
    params: Vec<&'a str>,
    blocks: Vec<RawBlock<'a>>,
}

struct Parser<'a> {
    text: &'a str,
    functions: Vec<RawFunction<'a>>,
    current: Option<RawFunction<'a>>,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            functions: Vec::new(),
            current: None,
        }
    }

    fn parse(mut self) -> ParseResult<Vec<RawFunction<'a>>> {
        let text = self.text;
        let mut last_line = 0;
        for (idx, raw_line) in text.lines().enumerate() {
            let line = idx + 1;
            last_line = line;
            let content = raw_line.split(';').next().unwrap_or("").trim();
            if content.is_empty() {
                continue;
            }

            if let Some(header) = content.strip_prefix("fn ") {
                self.parse_header(line, header)?;
            } else if content == "}" {
                let function = self
                    .current
                    .take()
                    .ok_or_else(|| ParseError::new(line, "`}` outside of a function"))?;
                self.functions.push(function);
            } else if let Some(label) = content.strip_suffix(':') {
                let function = self
                    .current
                    .as_mut()
                    .ok_or_else(|| ParseError::new(line, "block label outside of a function"))?;
                if !is_identifier(label) {
                    return Err(ParseError::new(line, format!("invalid block name `{}`", label)));
                }
                function.blocks.push(RawBlock {
                    name: label,
                    line,
                    insts: Vec::new(),
                });
            } else {
                let inst = parse_instruction(line, content)?;
                let block = self
                    .current
                    .as_mut()
                    .and_then(|function| function.blocks.last_mut())
                    .ok_or_else(|| ParseError::new(line, "instruction outside of a block"))?;
                block.insts.push(inst);
            }
        }

        if let Some(function) = self.current {
            return Err(ParseError::new(
                last_line,
                format!("function `{}` is not closed", function.name),
            ));
        }
        Ok(self.functions)
    }

    fn parse_header(&mut self, line: usize, header: &'a str) -> ParseResult<()> {
        if self.current.is_some() {
            return Err(ParseError::new(line, "nested function definition"));
        }
        let header = header
            .trim()
            .strip_suffix('{')
            .ok_or_else(|| ParseError::new(line, "expected `{` after function header"))?
            .trim();
        let open = header
            .find('(')
            .ok_or_else(|| ParseError::new(line, "expected `(` in function header"))?;
        let params_text = header[open + 1..]
            .strip_suffix(')')
            .ok_or_else(|| ParseError::new(line, "expected `)` in function header"))?;
        let name = header[..open].trim();
        if !is_identifier(name) {
            return Err(ParseError::new(line, format!("invalid function name `{}`", name)));
        }

        let mut params = Vec::new();
        for param in params_text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            params.push(value_name(line, param)?);
        }

        self.current = Some(RawFunction {
            name,
            line,
            params,
            blocks: Vec::new(),
        });
        Ok(())
    }
}

fn is_identifier(text: &str) -> bool {
    !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn value_name(line: usize, token: &str) -> ParseResult<&str> {
    match token.strip_prefix('%') {
        Some(name) if is_identifier(name) => Ok(name),
        _ => Err(ParseError::new(line, format!("expected a value, found `{}`", token))),
    }
}

fn parse_instruction(line: usize, content: &str) -> ParseResult<RawInst<'_>> {
    let (dest, rest) = match content.split_once('=') {
        Some((dest, rest)) => (Some(value_name(line, dest.trim())?), rest),
        None => (None, content),
    };
    let mut tokens = rest
        .split(|c: char| c.is_whitespace() || c == ',' || c == '(' || c == ')')
        .filter(|t| !t.is_empty());
    let mnemonic = tokens
        .next()
        .ok_or_else(|| ParseError::new(line, "missing mnemonic"))?;
    Ok(RawInst {
        line,
        dest,
        mnemonic,
        args: tokens.collect(),
    })
}

impl<'a> RawFunction<'a> {
    fn resolve(self) -> ParseResult<Function> {
        let mut values: HashMap<&'a str, ValueId> = HashMap::new();
        for (index, param) in self.params.iter().enumerate() {
            if values.insert(*param, ValueId(index as u32)).is_some() {
                return Err(ParseError::new(self.line, format!("duplicate argument `%{}`", param)));
            }
        }

        let mut next = self.params.len() as u32;
        for block in &self.blocks {
            for inst in &block.insts {
                if let Some(dest) = inst.dest {
                    if values.insert(dest, ValueId(next)).is_some() {
                        return Err(ParseError::new(
                            inst.line,
                            format!("value `%{}` is defined twice", dest),
                        ));
                    }
                }
                next += 1;
            }
        }

        let mut blocks: HashMap<&'a str, BlockId> = HashMap::new();
        let mut builder = FunctionBuilder::new(self.name, self.params.len());
        for (idx, param) in self.params.iter().enumerate() {
            if let Some(arg) = builder.arg(idx) {
                builder.name_value(arg, *param);
            }
        }
        for block in &self.blocks {
            let id = builder.block(block.name);
            if blocks.insert(block.name, id).is_some() {
                return Err(ParseError::new(
                    block.line,
                    format!("block `{}` is defined twice", block.name),
                ));
            }
        }

        let resolver = Resolver {
            values: &values,
            blocks: &blocks,
        };
        for (idx, block) in self.blocks.iter().enumerate() {
            builder.switch_to(BlockId(idx as u32));
            for inst in &block.insts {
                let op = resolver.op(inst)?;
                if inst.dest.is_some() && !op.has_result() {
                    return Err(ParseError::new(
                        inst.line,
                        format!("`{}` does not produce a value", inst.mnemonic),
                    ));
                }
                let id = builder.push(op);
                if let Some(dest) = inst.dest {
                    builder.name_value(id, dest);
                }
            }
        }
        Ok(builder.finish())
    }
}

struct Resolver<'r, 'a> {
    values: &'r HashMap<&'a str, ValueId>,
    blocks: &'r HashMap<&'a str, BlockId>,
}

impl Resolver<'_, '_> {
    fn value(&self, line: usize, token: &str) -> ParseResult<ValueId> {
        let name = value_name(line, token)?;
        self.values
            .get(name)
            .copied()
            .ok_or_else(|| ParseError::new(line, format!("undefined value `%{}`", name)))
    }

    fn block(&self, line: usize, token: &str) -> ParseResult<BlockId> {
        self.blocks
            .get(token)
            .copied()
            .ok_or_else(|| ParseError::new(line, format!("undefined block `{}`", token)))
    }

    fn op(&self, inst: &RawInst<'_>) -> ParseResult<Op> {
        let line = inst.line;
        let args = &inst.args;
        let expect = |count: usize| {
            if args.len() == count {
                Ok(())
            } else {
                Err(ParseError::new(
                    line,
                    format!(
                        "`{}` takes {} operand(s), found {}",
                        inst.mnemonic,
                        count,
                        args.len()
                    ),
                ))
            }
        };
        let number_error = |token: &str| ParseError::new(line, format!("invalid number `{}`", token));

        let op = match inst.mnemonic {
            "ldi" => {
                expect(1)?;
                Op::Imm(args[0].parse().map_err(|_| number_error(args[0]))?)
            }
            "ldf" => {
                expect(1)?;
                Op::ImmF(args[0].parse().map_err(|_| number_error(args[0]))?)
            }
            "alloca" => {
                expect(1)?;
                Op::Alloca {
                    size: args[0].parse().map_err(|_| number_error(args[0]))?,
                }
            }
            "ld" => {
                expect(1)?;
                Op::Load {
                    addr: self.value(line, args[0])?,
                }
            }
            "st" => {
                expect(2)?;
                Op::Store {
                    addr: self.value(line, args[0])?,
                    value: self.value(line, args[1])?,
                }
            }
            "sym" => {
                expect(1)?;
                let name = args[0]
                    .strip_prefix('@')
                    .ok_or_else(|| ParseError::new(line, "expected `@symbol`"))?;
                Op::Symbol(name.to_string())
            }
            "call" => {
                let (target, rest) = args
                    .split_first()
                    .ok_or_else(|| ParseError::new(line, "`call` needs a callee"))?;
                let callee = match target.strip_prefix('@') {
                    Some(name) if is_identifier(name) => Callee::Direct(name.to_string()),
                    _ => Callee::Indirect(self.value(line, target)?),
                };
                let args = rest
                    .iter()
                    .map(|arg| self.value(line, arg))
                    .collect::<ParseResult<Vec<_>>>()?;
                Op::Call { callee, args }
            }
            "br" => {
                expect(3)?;
                Op::Br {
                    cond: self.value(line, args[0])?,
                    then_block: self.block(line, args[1])?,
                    else_block: self.block(line, args[2])?,
                }
            }
            "jmp" => {
                expect(1)?;
                Op::Jmp {
                    target: self.block(line, args[0])?,
                }
            }
            "ret" => {
                expect(0)?;
                Op::Ret
            }
            "retr" => {
                expect(1)?;
                Op::RetVal {
                    value: self.value(line, args[0])?,
                }
            }
            other => match BinOp::from_mnemonic(other) {
                Some(op) => {
                    expect(2)?;
                    Op::Binary {
                        op,
                        lhs: self.value(line, args[0])?,
                        rhs: self.value(line, args[1])?,
                    }
                }
                None => {
                    return Err(ParseError::new(line, format!("unknown mnemonic `{}`", other)))
                }
            },
        };
        Ok(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CALL_PROGRAM: &str = r#"
; bar returns its argument
fn bar(%i) {
entry:
    retr %i
}

fn main() {
entry:
    %c = ldi 5
    %r = call @bar(%c)
    retr %r
}
"#;

    #[test]
    fn test_parse_call_program() {
        let program = parse(CALL_PROGRAM).unwrap();
        assert_eq!(program.functions().len(), 2);

        let main = program.function("main").unwrap();
        let entry = main.block(main.entry()).unwrap();
        assert_eq!(entry.insts.len(), 3);
        assert_eq!(main.op(entry.insts[0]), Some(&Op::Imm(5)));
        assert_eq!(
            main.op(entry.insts[1]),
            Some(&Op::Call {
                callee: Callee::Direct("bar".into()),
                args: vec![entry.insts[0]],
            })
        );
        assert_eq!(main.value_name(entry.insts[1]), Some("r"));

        let bar = program.function("bar").unwrap();
        assert_eq!(bar.args().len(), 1);
        assert_eq!(bar.value_name(bar.args()[0]), Some("i"));
    }

    #[test]
    fn test_forward_references() {
        let text = r#"
fn main() {
entry:
    jmp exit
body:
    retr %x
exit:
    %x = ldi 3
    jmp body
}
"#;
        let program = parse(text).unwrap();
        let main = program.function("main").unwrap();
        let body = &main.blocks()[1];
        let exit = &main.blocks()[2];
        assert_eq!(main.op(body.insts[0]), Some(&Op::RetVal { value: exit.insts[0] }));
        assert_eq!(main.op(main.blocks()[0].insts[0]), Some(&Op::Jmp { target: BlockId(2) }));
    }

    #[test]
    fn test_print_then_parse() {
        let program = parse(CALL_PROGRAM).unwrap();
        let reparsed = parse(&program.to_string()).unwrap();
        assert_eq!(program.to_string(), reparsed.to_string());
    }

    #[test]
    fn test_errors_carry_line() {
        let err = parse("fn main() {\nentry:\n    %x = frob 1\n}\n").unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.message.contains("frob"));

        let err = parse("fn main() {\nentry:\n    retr %nope\n}\n").unwrap_err();
        assert!(err.message.contains("undefined value"));

        let err = parse("fn main() {\nentry:\n    ret\n").unwrap_err();
        assert!(err.message.contains("not closed"));

        let err = parse("fn main() {\nentry:\n    %x = st %a, %b\n}\n").unwrap_err();
        assert_eq!(err.line, 3);
    }

    #[test]
    fn test_duplicate_function_is_reported() {
        let text = "fn f() {\nentry:\n ret\n}\nfn f() {\nentry:\n ret\n}\n";
        let err = parse(text).unwrap_err();
        assert_eq!(err.line, 5);
        assert!(err.message.contains("defined twice"));
    }

    #[test]
    fn test_indirect_call_and_sym() {
        let text = "fn main() {\nentry:\n    %f = sym @foo\n    %r = call %f()\n    retr %r\n}\n";
        let program = parse(text).unwrap();
        let main = program.function("main").unwrap();
        let insts = &main.blocks()[0].insts;
        assert_eq!(main.op(insts[0]), Some(&Op::Symbol("foo".into())));
        assert!(matches!(
            main.op(insts[1]),
            Some(Op::Call { callee: Callee::Indirect(_), args }) if args.is_empty()
        ));
    }
}
