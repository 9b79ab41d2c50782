//! Evaluator descriptors.
//!
//! The foreign context exposes its evaluator's placement and capacity as a single string
//! of comma-separated `Key=Value` pairs:
//!
//! ```text
//! IP=10.0.0.7, Port=7001, HostName=worker-3, Memory=2048, Core=4, RuntimeName=Local
//! ```
//!
//! `IP`, `Port`, `HostName` and `Memory` are required. `Core` defaults to 1 and
//! `RuntimeName` is optional. Whitespace around each component is ignored.

use std::{
    collections::HashMap,
    fmt,
    net::{IpAddr, SocketAddr},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{BridgeError, BridgeResult, DescriptorError},
    handle::RuntimeHandle,
    logger::BridgeLogger,
    runtime::{ForeignEnv, ForeignRuntime, Signature, ValueKind, resolve_method},
};

const IP: &str = "IP";
const PORT: &str = "Port";
const HOST_NAME: &str = "HostName";
const MEMORY: &str = "Memory";
const CORE: &str = "Core";
const RUNTIME_NAME: &str = "RuntimeName";

/// Where an evaluator runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub host_name: String,
    pub address: SocketAddr,
}

/// Placement and capacity of the evaluator hosting a context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatorDescriptor {
    pub node: NodeDescriptor,
    /// Memory in megabytes.
    pub memory_mb: u32,
    pub virtual_cores: u32,
    pub runtime_name: Option<String>,
}

impl FromStr for EvaluatorDescriptor {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut settings: HashMap<&str, &str> = HashMap::new();
        for component in s.split(',') {
            let component = component.trim();
            let mut parts = component.split('=');
            let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err(DescriptorError::MalformedComponent(component.to_owned()));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(DescriptorError::MalformedComponent(component.to_owned()));
            }
            if settings.insert(key, value.trim()).is_some() {
                return Err(DescriptorError::DuplicateKey(key.to_owned()));
            }
        }

        let ip: IpAddr = parse(&settings, IP)?;
        let port: u16 = parse(&settings, PORT)?;
        let host_name = required(&settings, HOST_NAME)?.to_owned();
        let memory_mb: u32 = parse(&settings, MEMORY)?;
        let virtual_cores: u32 = match settings.get(CORE) {
            Some(_) => parse(&settings, CORE)?,
            None => 1,
        };
        let runtime_name = settings.get(RUNTIME_NAME).map(|name| (*name).to_owned());

        Ok(Self {
            node: NodeDescriptor {
                host_name,
                address: SocketAddr::new(ip, port),
            },
            memory_mb,
            virtual_cores,
            runtime_name,
        })
    }
}

impl fmt::Display for EvaluatorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{IP}={}, {PORT}={}, {HOST_NAME}={}, {MEMORY}={}, {CORE}={}",
            self.node.address.ip(),
            self.node.address.port(),
            self.node.host_name,
            self.memory_mb,
            self.virtual_cores
        )?;
        if let Some(runtime_name) = &self.runtime_name {
            write!(f, ", {RUNTIME_NAME}={runtime_name}")?;
        }
        Ok(())
    }
}

fn required<'a>(settings: &HashMap<&str, &'a str>, key: &'static str) -> Result<&'a str, DescriptorError> {
    settings.get(key).copied().ok_or(DescriptorError::MissingKey(key))
}

fn parse<T: FromStr>(settings: &HashMap<&str, &str>, key: &'static str) -> Result<T, DescriptorError> {
    let value = required(settings, key)?;
    value.parse().map_err(|_| DescriptorError::InvalidValue {
        key,
        value: value.to_owned(),
    })
}

/// Asks the foreign object for its evaluator descriptor string and parses it.
///
/// Resolves `method` as `() -> string` on the object's class. A missing method, a
/// degraded handle or a null result are all errors here; nothing is absorbed.
pub fn retrieve_evaluator_descriptor<R: ForeignRuntime>(
    handle: &RuntimeHandle<R>,
    origin: &R::Global,
    method: &str,
    logger: &impl BridgeLogger,
) -> BridgeResult<EvaluatorDescriptor> {
    logger.log_start("RetrieveEvaluatorDescriptor");
    let raw = handle.attach(|env| {
        let object = env.local(origin);
        let method_id = resolve_method(env, &object, method, &Signature::string_supplier())?;
        match env.call(&object, &method_id, &[])? {
            Some(string) => env.read_string(&string),
            None => Err(BridgeError::TypeMismatch {
                expected: ValueKind::String,
                got: "null".to_owned(),
            }),
        }
    })??;
    let descriptor: EvaluatorDescriptor = raw.parse()?;
    logger.log_stop("RetrieveEvaluatorDescriptor");
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_full_descriptor() {
        let descriptor: EvaluatorDescriptor =
            "IP=10.0.0.7, Port=7001, HostName=worker-3, Memory=2048, Core=4, RuntimeName=Local"
                .parse()
                .unwrap();
        assert_eq!(
            descriptor,
            EvaluatorDescriptor {
                node: NodeDescriptor {
                    host_name: "worker-3".to_owned(),
                    address: "10.0.0.7:7001".parse().unwrap(),
                },
                memory_mb: 2048,
                virtual_cores: 4,
                runtime_name: Some("Local".to_owned()),
            }
        );
    }

    #[test]
    fn core_defaults_to_one() {
        let descriptor: EvaluatorDescriptor = "IP=127.0.0.1,Port=1,HostName=h,Memory=64".parse().unwrap();
        assert_eq!(descriptor.virtual_cores, 1);
        assert_eq!(descriptor.runtime_name, None);
    }

    #[test]
    fn missing_required_key() {
        let err = "IP=127.0.0.1, Port=1, Memory=64".parse::<EvaluatorDescriptor>().unwrap_err();
        assert_eq!(err, DescriptorError::MissingKey("HostName"));
    }

    #[test]
    fn malformed_components() {
        for input in ["IP", "IP=1=2, Port=1", "", "IP=127.0.0.1,", "=x"] {
            let err = input.parse::<EvaluatorDescriptor>().unwrap_err();
            assert!(
                matches!(err, DescriptorError::MalformedComponent(_)),
                "expected malformed component for {input:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn duplicate_key() {
        let err = "IP=127.0.0.1, IP=127.0.0.2".parse::<EvaluatorDescriptor>().unwrap_err();
        assert_eq!(err, DescriptorError::DuplicateKey("IP".to_owned()));
    }

    #[test]
    fn invalid_numbers_and_addresses() {
        let err = "IP=not-an-ip, Port=1, HostName=h, Memory=1"
            .parse::<EvaluatorDescriptor>()
            .unwrap_err();
        assert!(matches!(err, DescriptorError::InvalidValue { key: "IP", .. }));

        let err = "IP=::1, Port=70000, HostName=h, Memory=1"
            .parse::<EvaluatorDescriptor>()
            .unwrap_err();
        assert_eq!(
            err,
            DescriptorError::InvalidValue {
                key: "Port",
                value: "70000".to_owned()
            }
        );
    }

    #[test]
    fn display_parses_back() {
        let text = "IP=::1, Port=9, HostName=local, Memory=512, Core=2";
        let descriptor: EvaluatorDescriptor = text.parse().unwrap();
        assert_eq!(descriptor.to_string(), text);
    }
}
