//! Line-oriented front end: one command per line.

use crate::render::render;
use anyhow::{anyhow, bail, Result};
use quack_registry::{CallArgs, DispatchError, FieldValue, Request};
use quack_session::{Session, SessionError};

pub const HELP: &str = "\
devices                     list discovered dongles
select <n|id>               select a dongle (alias: dongle)
modules                     list modules of the selected dongle
help [module]               commands of one or every module
<m>.<cmd>()                 call a method without arguments
<m>.<cmd>(value)            call with a single value
<m>.<cmd>(k=v, ...)         call with named fields
<m>.<attr>                  read an attribute (reply shows up under `last`)
<m>.<attr> = value          write an attribute; `(k=v, ...)` for named fields
last                        most recent reply
packets                     captured packets
clear                       drop captured packets
stats                       client metrics
exit
literals: true false 42 0x2a 433.92 \"text\" SYMBOL h'0102'";

#[derive(Clone, Debug, PartialEq)]
pub enum Target {
    Index(usize),
    Address(String),
}

#[derive(Clone, Debug)]
pub enum Command {
    Empty,
    Devices,
    Select(Target),
    Modules,
    Help(Option<String>),
    Invoke {
        module: String,
        command: String,
        args: CallArgs,
    },
    Get {
        module: String,
        attribute: String,
    },
    Set {
        module: String,
        attribute: String,
        args: CallArgs,
    },
    Last,
    Packets,
    ClearPackets,
    Stats,
    Exit,
}

pub enum Outcome {
    Print(String),
    Exit,
}

pub fn parse_line(line: &str) -> Result<Command> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(Command::Empty);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim()),
        None => (line, ""),
    };
    let cmd = match (word, rest) {
        ("devices", "") => Command::Devices,
        ("modules", "") => Command::Modules,
        ("last", "") => Command::Last,
        ("packets", "") => Command::Packets,
        ("clear", "") => Command::ClearPackets,
        ("stats", "") => Command::Stats,
        ("exit" | "quit", "") => Command::Exit,
        ("help", "") => Command::Help(None),
        ("help", module) => Command::Help(Some(module.to_string())),
        ("select" | "dongle", "") => bail!("usage: select <n|id>"),
        ("select" | "dongle", target) => Command::Select(match target.parse::<usize>() {
            Ok(i) => Target::Index(i),
            Err(_) => Target::Address(target.to_string()),
        }),
        _ => parse_module_line(line)?,
    };
    Ok(cmd)
}

fn parse_module_line(line: &str) -> Result<Command> {
    let (module, rest) = line
        .split_once('.')
        .ok_or_else(|| anyhow!("unknown command '{line}'; try `help`"))?;
    let module = ident(module.trim())?;

    if let Some((name, value)) = assignment(rest) {
        let attribute = ident(name.trim())?;
        let value = value.trim();
        let args = match value.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
            Some(inner) => parse_args(inner)?,
            None => CallArgs::Value(parse_literal(value)?),
        };
        return Ok(Command::Set {
            module,
            attribute,
            args,
        });
    }

    match rest.split_once('(') {
        Some((name, tail)) => {
            let inner = tail
                .trim_end()
                .strip_suffix(')')
                .ok_or_else(|| anyhow!("missing ')'"))?;
            Ok(Command::Invoke {
                module,
                command: ident(name.trim())?,
                args: parse_args(inner)?,
            })
        }
        None => Ok(Command::Get {
            module,
            attribute: ident(rest.trim())?,
        }),
    }
}

fn ident(s: &str) -> Result<String> {
    let mut chars = s.chars();
    let ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !ok {
        bail!("'{s}' is not a valid name");
    }
    Ok(s.to_string())
}

/// `attr = value`: an `=` before any call parenthesis or string.
fn assignment(rest: &str) -> Option<(&str, &str)> {
    for (i, c) in rest.char_indices() {
        match c {
            '(' | '"' => return None,
            '=' => return Some((&rest[..i], &rest[i + 1..])),
            _ => {}
        }
    }
    None
}

/// Split on `sep` outside double quotes. `None` when `sep` never occurs there.
fn split_top_level(s: &str, sep: char) -> Option<Vec<String>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut escaped = false;
    let mut found = false;
    for c in s.chars() {
        if quoted {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                quoted = false;
            }
            continue;
        }
        match c {
            '"' => {
                quoted = true;
                current.push(c);
            }
            c if c == sep => {
                found = true;
                parts.push(core::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    parts.push(current);
    found.then_some(parts)
}

fn parse_args(inner: &str) -> Result<CallArgs> {
    let inner = inner.trim();
    if inner.is_empty() {
        return Ok(CallArgs::None);
    }
    let parts = split_top_level(inner, ',').unwrap_or_else(|| vec![inner.to_string()]);
    let mut fields = Vec::new();
    let mut positional = Vec::new();
    for part in parts {
        let part = part.trim();
        match split_top_level(part, '=') {
            Some(kv) if kv.len() == 2 => {
                fields.push((ident(kv[0].trim())?, parse_literal(kv[1].trim())?));
            }
            Some(_) => bail!("malformed argument '{part}'"),
            None => positional.push(parse_literal(part)?),
        }
    }
    match (positional.len(), fields.is_empty()) {
        (0, _) => Ok(CallArgs::Fields(fields)),
        (1, true) => Ok(CallArgs::Value(positional.remove(0))),
        _ => bail!("use either one positional value or named fields"),
    }
}

pub fn parse_literal(raw: &str) -> Result<FieldValue> {
    let raw = raw.trim();
    match raw {
        "" => bail!("missing value"),
        "true" => return Ok(FieldValue::Bool(true)),
        "false" => return Ok(FieldValue::Bool(false)),
        _ => {}
    }
    if let Some(body) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        return Ok(FieldValue::Text(unescape(body)));
    }
    if let Some(body) = raw.strip_prefix("h'").and_then(|r| r.strip_suffix('\'')) {
        let bytes = hex::decode(body).map_err(|e| anyhow!("bad hex literal: {e}"))?;
        return Ok(FieldValue::Bytes(bytes));
    }
    let (negative, digits) = match raw.strip_prefix('-') {
        Some(d) => (true, d),
        None => (false, raw),
    };
    if let Some(hex_digits) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        let v = i64::from_str_radix(hex_digits, 16).map_err(|e| anyhow!("bad hex integer: {e}"))?;
        return Ok(FieldValue::Int(if negative { -v } else { v }));
    }
    if let Ok(v) = raw.parse::<i64>() {
        return Ok(FieldValue::Int(v));
    }
    if let Ok(v) = raw.parse::<f64>() {
        if raw.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '.') {
            return Ok(FieldValue::Float(v));
        }
    }
    if ident(raw).is_ok() {
        return Ok(FieldValue::Text(raw.to_string()));
    }
    bail!("cannot parse value '{raw}'")
}

fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn describe(request: &Request, what: &str) -> String {
    let mut out = format!("-> {what}");
    for issue in &request.issues {
        out.push_str(&format!("\n   skipped: {issue}"));
    }
    out
}

fn report(err: SessionError) -> String {
    match err {
        SessionError::Dispatch(DispatchError::UnknownCommand { command, help, .. }) => {
            format!("'{command}' not found\n{help}")
        }
        other => format!("error: {other}"),
    }
}

pub fn execute(session: &Session, cmd: Command, json: bool) -> Outcome {
    let text = match cmd {
        Command::Empty => String::new(),
        Command::Exit => return Outcome::Exit,
        Command::Devices => {
            let active = session.active_device().map(|d| d.id);
            let devices = session.devices();
            if devices.is_empty() {
                "no dongles discovered yet".to_string()
            } else {
                devices
                    .iter()
                    .map(|d| {
                        let mark = if Some(d.id) == active { '*' } else { ' ' };
                        format!("{mark} {}: {}", d.id, d.address)
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        Command::Select(target) => {
            let selected = match target {
                Target::Index(i) => session.select(i),
                Target::Address(a) => session.select_by_address(&a),
            };
            match selected {
                Ok(d) => format!("selected dongle {}: {}", d.id, d.address),
                Err(e) => report(e),
            }
        }
        Command::Modules => session.modules().join("\n"),
        Command::Help(None) if session.modules().is_empty() => HELP.to_string(),
        Command::Help(module) => match session.help(module.as_deref()) {
            Ok(text) => text,
            Err(e) => report(e),
        },
        Command::Invoke {
            module,
            command,
            args,
        } => match session.invoke(&module, &command, args) {
            Ok(req) => describe(&req, &format!("{module}.{command}()")),
            Err(e) => report(e),
        },
        Command::Get { module, attribute } => match session.get(&module, &attribute) {
            Ok(req) => describe(&req, &format!("{module}.{attribute} requested")),
            Err(e) => report(e),
        },
        Command::Set {
            module,
            attribute,
            args,
        } => match session.set(&module, &attribute, args) {
            Ok(req) => describe(&req, &format!("{module}.{attribute} set")),
            Err(e) => report(e),
        },
        Command::Last => match session.last_reply() {
            Some(reply) => format!("{}\n{}", reply.address, render(&reply.message, json)),
            None => "no reply yet".to_string(),
        },
        Command::Packets => session
            .packets()
            .iter()
            .enumerate()
            .map(|(i, p)| format!("#{i} {}", render(&p.message, json).trim_end()))
            .collect::<Vec<_>>()
            .join("\n"),
        Command::ClearPackets => format!("dropped {} packets", session.clear_packets()),
        Command::Stats => session.metrics().encode_text(),
    };
    Outcome::Print(text)
}
