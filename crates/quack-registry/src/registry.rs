use crate::schema::{wire_name, SchemaCatalog, VOID_TYPE};
use crate::shape::{shape, CallArgs, FieldIssue};
use crate::{DispatchError, Result};
use prost::Message as _;
use prost_reflect::{DynamicMessage, Value};
use quack_transport::{topic, Direction, Scope, Verb};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CommandKind {
    /// Readable and writable value.
    Attribute,
    Method,
}

impl CommandKind {
    /// `CmdInfo.cmdType` numbering.
    pub fn from_number(n: i32) -> Self {
        match n {
            1 => CommandKind::Method,
            _ => CommandKind::Attribute,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Attribute => "attribute",
            CommandKind::Method => "method",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandDescriptor {
    pub name: String,
    pub kind: CommandKind,
    /// Wire type name, e.g. `rfquack_VoidValue`.
    pub argument_type: String,
    pub description: String,
}

impl CommandDescriptor {
    /// Read a decoded `CmdInfo` message.
    pub fn from_info(name: impl Into<String>, info: &DynamicMessage) -> Self {
        let text = |field: &str| match info.get_field_by_name(field).as_deref() {
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        };
        let kind = match info.get_field_by_name("cmdType").as_deref() {
            Some(Value::EnumNumber(n)) => CommandKind::from_number(*n),
            _ => CommandKind::Attribute,
        };
        Self {
            name: name.into(),
            kind,
            argument_type: text("argumentType"),
            description: text("description"),
        }
    }

    pub fn takes_no_arguments(&self) -> bool {
        self.argument_type == VOID_TYPE
    }
}

#[derive(Clone, Debug, Default)]
pub struct Module {
    name: String,
    commands: BTreeMap<String, CommandDescriptor>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commands: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command(&self, name: &str) -> Option<&CommandDescriptor> {
        self.commands.get(name)
    }

    pub fn commands(&self) -> impl Iterator<Item = &CommandDescriptor> {
        self.commands.values()
    }

    pub fn command_names(&self) -> Vec<String> {
        self.commands.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// One line per command: name, kind, argument type, description.
    pub fn help(&self) -> String {
        let width = self.commands.keys().map(String::len).max().unwrap_or(0);
        let mut out = format!("{}:\n", self.name);
        for cmd in self.commands.values() {
            let call = match cmd.kind {
                CommandKind::Method if cmd.takes_no_arguments() => "()",
                CommandKind::Method => "(..)",
                CommandKind::Attribute => "",
            };
            out.push_str(&format!(
                "  {:<width$} {:<9} {:<24} {}\n",
                format!("{}{call}", cmd.name),
                cmd.kind.as_str(),
                cmd.argument_type,
                cmd.description,
                width = width + 4,
            ));
        }
        out
    }

    fn insert(&mut self, cmd: CommandDescriptor) {
        self.commands.insert(cmd.name.clone(), cmd);
    }
}

/// A request ready for [`quack_transport::Transport::send`].
#[derive(Clone, Debug)]
pub struct Request {
    pub verb: Verb,
    pub module: String,
    /// Topic segments after the module.
    pub args: Vec<String>,
    pub payload: Vec<u8>,
    /// Fields that were skipped while shaping the payload.
    pub issues: Vec<FieldIssue>,
}

impl Request {
    pub fn topic(&self, scope: &Scope) -> String {
        let args: Vec<&str> = self.args.iter().map(String::as_str).collect();
        topic::build(scope, Direction::In, &self.verb, &self.module, &args)
    }
}

/// Commands of the active dongle, grouped by module.
pub struct DispatchRegistry {
    catalog: Arc<SchemaCatalog>,
    modules: BTreeMap<String, Module>,
}

impl DispatchRegistry {
    pub fn new(catalog: Arc<SchemaCatalog>) -> Self {
        Self {
            catalog,
            modules: BTreeMap::new(),
        }
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    /// Record one `CmdInfo`. Returns true when this created the module.
    pub fn ingest(&mut self, module: &str, command: &str, info: &DynamicMessage) -> bool {
        let desc = CommandDescriptor::from_info(command, info);
        debug!(module, command, kind = desc.kind.as_str(), arg = %desc.argument_type, "descriptor");
        let created = !self.modules.contains_key(module);
        if created {
            info!(module, "new module");
        }
        self.modules
            .entry(module.to_string())
            .or_insert_with(|| Module::new(module))
            .insert(desc);
        created
    }

    pub fn clear(&mut self) {
        self.modules.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.values()
    }

    pub fn module_names(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }

    pub fn help(&self, module: &str) -> Result<String> {
        Ok(self.lookup_module(module)?.help())
    }

    /// Call a method. The reply, if any, arrives later as an ordinary inbound message.
    pub fn invoke(&self, module: &str, command: &str, args: CallArgs) -> Result<Request> {
        let cmd = self.lookup(module, command)?;
        if cmd.kind != CommandKind::Method {
            return Err(DispatchError::NotAMethod {
                module: module.to_string(),
                command: command.to_string(),
            });
        }
        self.set_request(module, cmd, args)
    }

    /// Read an attribute.
    pub fn get(&self, module: &str, attribute: &str) -> Result<Request> {
        let cmd = self.lookup(module, attribute)?;
        if cmd.kind != CommandKind::Attribute {
            return Err(DispatchError::NotAnAttribute {
                module: module.to_string(),
                command: attribute.to_string(),
            });
        }
        let payload = self.catalog.empty(VOID_TYPE)?.encode_to_vec();
        Ok(Request {
            verb: Verb::Get,
            module: module.to_string(),
            args: vec![cmd.name.clone()],
            payload,
            issues: Vec::new(),
        })
    }

    /// Write an attribute (or call a command with an explicit value).
    pub fn set(&self, module: &str, command: &str, args: CallArgs) -> Result<Request> {
        let cmd = self.lookup(module, command)?;
        self.set_request(module, cmd, args)
    }

    fn set_request(&self, module: &str, cmd: &CommandDescriptor, args: CallArgs) -> Result<Request> {
        let desc = self.catalog.resolve(&cmd.argument_type)?;
        let shaped = shape(&desc, args)?;
        Ok(Request {
            verb: Verb::Set,
            module: module.to_string(),
            args: vec![wire_name(&desc), cmd.name.clone()],
            payload: shaped.message.encode_to_vec(),
            issues: shaped.issues,
        })
    }

    fn lookup_module(&self, module: &str) -> Result<&Module> {
        self.modules.get(module).ok_or_else(|| DispatchError::UnknownModule {
            module: module.to_string(),
            known: self.module_names().join(", "),
        })
    }

    fn lookup(&self, module: &str, command: &str) -> Result<&CommandDescriptor> {
        let m = self.lookup_module(module)?;
        m.command(command).ok_or_else(|| {
            let help = m.help();
            warn!(module, command, "unknown command\n{help}");
            DispatchError::UnknownCommand {
                module: module.to_string(),
                command: command.to_string(),
                help,
            }
        })
    }
}
