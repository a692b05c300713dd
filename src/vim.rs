//! vim25 SOAP client.
//!
//! Speaks just enough of the vSphere Web Services API to resolve VM
//! references into typed [`VirtualMachine`] records:
//!
//! | Call | Managed object | Purpose |
//! |------|----------------|---------|
//! | `RetrieveServiceContent` | `ServiceInstance` | locate the property collector, session and custom fields managers |
//! | `Login` / `Logout` | `SessionManager` | session cookie `vmware_soap_session` |
//! | `RetrievePropertiesEx` | `PropertyCollector` | VM properties, custom field definitions |
//!
//! Responses are decoded with `quick-xml` into a small [`XmlNode`] tree and
//! then into [`PropertyValue`]s. Properties outside the typed schema are
//! fetched one path per request, so a path the server rejects only leaves
//! that property unset.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use std::collections::HashMap;

use vm_inventory_core::backend::{BackendError, VimApi};
use vm_inventory_core::models::{
    CustomFieldDef, CustomFieldValue, GuestInfo, VirtualMachine, VmConfig, VmHardware, VmRef,
    VmRuntime,
};
use vm_inventory_core::property::{Attribute, DataObject, PropertyValue, CUSTOM_VALUE};

use crate::session::ConnectionContext;

const SOAP_ACTION: &str = "urn:vim25/7.0.3.0";
const SESSION_COOKIE: &str = "vmware_soap_session";

/// Property paths decoded into the typed schema.
pub const TYPED_PATHS: [&str; 19] = [
    "name",
    "config.uuid",
    "config.instanceUuid",
    "config.guestId",
    "config.guestFullName",
    "config.name",
    "config.template",
    "config.cpuHotAddEnabled",
    "config.cpuHotRemoveEnabled",
    "config.hardware.numCPU",
    "config.hardware.memoryMB",
    "guest.hostName",
    "guest.ipAddress",
    "guest.guestId",
    "guest.guestFullName",
    "guest.guestState",
    "runtime.powerState",
    "runtime.maxMemoryUsage",
    CUSTOM_VALUE,
];

// ============ XML tree ============

/// Element of a decoded SOAP response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlNode {
    /// Local name, without namespace prefix.
    pub name: String,
    /// Local part of `xsi:type`.
    pub xsi_type: Option<String>,
    /// Unprefixed `type` attribute carried by managed object references.
    pub mo_type: Option<String>,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }
}

fn decode_err(e: impl std::fmt::Display) -> BackendError {
    BackendError::Decode(e.to_string())
}

fn node_from_start(e: &BytesStart) -> Result<XmlNode, BackendError> {
    let mut node = XmlNode {
        name: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
        ..Default::default()
    };
    for attr in e.attributes() {
        let attr = attr.map_err(decode_err)?;
        if attr.key.local_name().as_ref() != b"type" {
            continue;
        }
        let value = attr.unescape_value().map_err(decode_err)?.into_owned();
        if attr.key.prefix().is_some() {
            let local = value.rsplit(':').next().unwrap_or(&value).to_string();
            node.xsi_type = Some(local);
        } else {
            node.mo_type = Some(value);
        }
    }
    Ok(node)
}

fn attach(stack: &mut [XmlNode], node: XmlNode) -> Result<(), BackendError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(node);
            Ok(())
        }
        None => Err(decode_err("unbalanced XML document")),
    }
}

/// Parse an XML document into its root element.
pub fn parse_xml(xml: &str) -> Result<XmlNode, BackendError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    // Synthetic document node at the bottom of the stack.
    let mut stack = vec![XmlNode::default()];

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => stack.push(node_from_start(&e)?),
            Ok(Event::Empty(e)) => {
                let node = node_from_start(&e)?;
                attach(&mut stack, node)?;
            }
            Ok(Event::End(_)) => {
                if stack.len() < 2 {
                    return Err(decode_err("unexpected closing tag"));
                }
                if let Some(node) = stack.pop() {
                    attach(&mut stack, node)?;
                }
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(decode_err)?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(BackendError::Decode(format!(
                    "invalid XML at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    if stack.len() != 1 {
        return Err(decode_err("truncated XML document"));
    }
    stack
        .pop()
        .and_then(|doc| doc.children.into_iter().next())
        .ok_or_else(|| decode_err("empty XML document"))
}

// ============ Value decoding ============

/// Decode a `val` element (or any nested element) into a [`PropertyValue`].
///
/// Leaves without an `xsi:type` decode as [`PropertyValue::Text`]; they
/// flatten to numbers or booleans when they read as one, and the typed
/// accessors still see the original text.
pub fn to_property(node: &XmlNode) -> PropertyValue {
    match node.xsi_type.as_deref() {
        Some("string" | "dateTime" | "anyURI" | "base64Binary" | "ManagedObjectReference") => {
            PropertyValue::String(node.text.clone())
        }
        Some("boolean") => PropertyValue::Bool(node.text == "true" || node.text == "1"),
        Some("int" | "long" | "short" | "byte") => node
            .text
            .trim()
            .parse()
            .map(PropertyValue::Int)
            .unwrap_or_else(|_| PropertyValue::String(node.text.clone())),
        Some("float" | "double") => node
            .text
            .trim()
            .parse()
            .map(PropertyValue::Float)
            .unwrap_or_else(|_| PropertyValue::String(node.text.clone())),
        Some(t) if t.starts_with("ArrayOf") => {
            let element_type = array_element_type(t);
            PropertyValue::List(
                node.children
                    .iter()
                    .map(|child| match (element_type, &child.xsi_type) {
                        (Some(ty), None) => to_property(&XmlNode {
                            xsi_type: Some(ty.to_string()),
                            ..child.clone()
                        }),
                        _ => to_property(child),
                    })
                    .collect(),
            )
        }
        _ if node.mo_type.is_some() => PropertyValue::String(node.text.clone()),
        None if node.children.is_empty() => PropertyValue::Text(node.text.clone()),
        Some(_) if node.children.is_empty() => PropertyValue::String(node.text.clone()),
        _ => PropertyValue::Object(to_data_object(node)),
    }
}

/// Primitive element type implied by an `ArrayOf*` type name.
fn array_element_type(array_type: &str) -> Option<&'static str> {
    match array_type {
        "ArrayOfString" => Some("string"),
        "ArrayOfBoolean" => Some("boolean"),
        "ArrayOfInt" | "ArrayOfLong" | "ArrayOfShort" | "ArrayOfByte" => Some("long"),
        "ArrayOfFloat" | "ArrayOfDouble" => Some("double"),
        _ => None,
    }
}

/// Repeated child elements become one list-valued attribute.
fn to_data_object(node: &XmlNode) -> DataObject {
    let mut grouped: Vec<(String, Vec<PropertyValue>)> = Vec::new();
    for child in &node.children {
        let value = to_property(child);
        match grouped.iter_mut().find(|(name, _)| *name == child.name) {
            Some((_, values)) => values.push(value),
            None => grouped.push((child.name.clone(), vec![value])),
        }
    }

    let mut object = DataObject::new(node.xsi_type.clone().unwrap_or_else(|| node.name.clone()));
    for (name, mut values) in grouped {
        let value = if values.len() == 1 {
            values.remove(0)
        } else {
            PropertyValue::List(values)
        };
        object = object.with_attribute(name, Attribute::Value(value));
    }
    object
}

/// Assemble a typed VM from decoded `propSet` entries.
pub fn vm_from_props(moid: &str, props: &HashMap<String, PropertyValue>) -> VirtualMachine {
    let text = |path: &str| props.get(path).and_then(|v| v.as_str()).map(str::to_string);
    let flag = |path: &str| props.get(path).and_then(PropertyValue::as_bool);
    let number = |path: &str| props.get(path).and_then(PropertyValue::as_i64);

    let config = text("config.uuid").map(|uuid| VmConfig {
        uuid,
        instance_uuid: text("config.instanceUuid"),
        guest_id: text("config.guestId"),
        guest_full_name: text("config.guestFullName"),
        name: text("config.name"),
        template: flag("config.template"),
        cpu_hot_add_enabled: flag("config.cpuHotAddEnabled"),
        cpu_hot_remove_enabled: flag("config.cpuHotRemoveEnabled"),
        hardware: VmHardware {
            num_cpu: number("config.hardware.numCPU"),
            memory_mb: number("config.hardware.memoryMB"),
        },
    });

    let custom_value = match props.get(CUSTOM_VALUE) {
        Some(PropertyValue::List(items)) => items.iter().filter_map(custom_field_value).collect(),
        Some(single @ PropertyValue::Object(_)) => custom_field_value(single).into_iter().collect(),
        _ => Vec::new(),
    };

    VirtualMachine {
        moid: moid.to_string(),
        name: text("name").unwrap_or_default(),
        config,
        guest: GuestInfo {
            host_name: text("guest.hostName"),
            ip_address: text("guest.ipAddress"),
            guest_id: text("guest.guestId"),
            guest_full_name: text("guest.guestFullName"),
            guest_state: text("guest.guestState"),
        },
        runtime: VmRuntime {
            power_state: text("runtime.powerState").unwrap_or_default(),
            max_memory_usage: number("runtime.maxMemoryUsage"),
        },
        custom_value,
        other: Default::default(),
    }
}

fn custom_field_value(value: &PropertyValue) -> Option<CustomFieldValue> {
    let key = value.attribute("key")?.as_i64()?;
    Some(CustomFieldValue {
        key: i32::try_from(key).ok()?,
        value: value
            .attribute("value")
            .and_then(PropertyValue::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

// ============ Envelopes ============

fn escape(s: &str) -> String {
    quick_xml::escape::escape(s).into_owned()
}

fn envelope(body: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" "#,
            r#"xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns="urn:vim25">"#,
            "<soapenv:Body>{}</soapenv:Body></soapenv:Envelope>"
        ),
        body
    )
}

fn retrieve_service_content_body() -> String {
    envelope(
        r#"<RetrieveServiceContent><_this type="ServiceInstance">ServiceInstance</_this></RetrieveServiceContent>"#,
    )
}

fn login_body(session_manager: &str, username: &str, password: &str) -> String {
    envelope(&format!(
        r#"<Login><_this type="SessionManager">{}</_this><userName>{}</userName><password>{}</password></Login>"#,
        escape(session_manager),
        escape(username),
        escape(password)
    ))
}

fn logout_body(session_manager: &str) -> String {
    envelope(&format!(
        r#"<Logout><_this type="SessionManager">{}</_this></Logout>"#,
        escape(session_manager)
    ))
}

fn retrieve_properties_body(
    collector: &str,
    object_type: &str,
    moid: &str,
    paths: &[&str],
) -> String {
    let path_set: String = paths
        .iter()
        .map(|p| format!("<pathSet>{}</pathSet>", escape(p)))
        .collect();
    envelope(&format!(
        concat!(
            r#"<RetrievePropertiesEx><_this type="PropertyCollector">{collector}</_this>"#,
            "<specSet><propSet><type>{ty}</type>{paths}</propSet>",
            r#"<objectSet><obj type="{ty}">{moid}</obj><skip>false</skip></objectSet></specSet>"#,
            "<options></options></RetrievePropertiesEx>"
        ),
        collector = escape(collector),
        ty = object_type,
        paths = path_set,
        moid = escape(moid)
    ))
}

// ============ Responses ============

/// Managed objects named by `RetrieveServiceContent`.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceContent {
    pub property_collector: String,
    pub session_manager: String,
    pub custom_fields_manager: Option<String>,
}

/// First element inside `soapenv:Body`, or the fault it carries.
fn body_payload(doc: XmlNode) -> Result<XmlNode, BackendError> {
    let body = doc
        .children
        .into_iter()
        .find(|c| c.name == "Body")
        .ok_or_else(|| decode_err("SOAP response has no Body"))?;
    let payload = body
        .children
        .into_iter()
        .next()
        .ok_or_else(|| decode_err("SOAP Body is empty"))?;
    if payload.name == "Fault" {
        return Err(fault_error(&payload));
    }
    Ok(payload)
}

/// Classify a SOAP fault by the `xsi:type` of its detail element.
pub fn fault_error(fault: &XmlNode) -> BackendError {
    let message = fault.child_text("faultstring").unwrap_or_default().to_string();
    let kind = fault
        .child("detail")
        .and_then(|d| d.children.first())
        .map(|d| {
            d.xsi_type
                .clone()
                .unwrap_or_else(|| d.name.trim_end_matches("Fault").to_string())
        })
        .unwrap_or_else(|| fault.child_text("faultcode").unwrap_or("Fault").to_string());

    match kind.as_str() {
        "InvalidLogin" => BackendError::InvalidLogin(message),
        "NoPermission" | "NotAuthenticated" => BackendError::NoPermission(message),
        "InvalidRequest" | "InvalidArgument" | "InvalidType" => {
            BackendError::InvalidRequest(message)
        }
        "InvalidProperty" => BackendError::InvalidProperty(message),
        "ManagedObjectNotFound" => BackendError::NotFound(message),
        _ => BackendError::Fault { kind, message },
    }
}

pub fn parse_service_content(payload: &XmlNode) -> Result<ServiceContent, BackendError> {
    let content = payload
        .child("returnval")
        .ok_or_else(|| decode_err("RetrieveServiceContent returned nothing"))?;
    let required = |name: &str| {
        content
            .child_text(name)
            .map(str::to_string)
            .ok_or_else(|| BackendError::Decode(format!("service content lacks {}", name)))
    };
    Ok(ServiceContent {
        property_collector: required("propertyCollector")?,
        session_manager: required("sessionManager")?,
        custom_fields_manager: content.child_text("customFieldsManager").map(str::to_string),
    })
}

/// `propSet` entries of the first object in a `RetrievePropertiesEx` reply.
///
/// `None` when the reply names no object.
pub fn parse_prop_set(payload: &XmlNode) -> Option<HashMap<String, PropertyValue>> {
    let object = payload.child("returnval")?.child("objects")?;
    Some(
        object
            .children_named("propSet")
            .filter_map(|prop| {
                let name = prop.child_text("name")?.to_string();
                let value = prop.child("val").map(to_property).unwrap_or(PropertyValue::Null);
                Some((name, value))
            })
            .collect(),
    )
}

fn session_cookie(headers: &reqwest::header::HeaderMap) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .find(|pair| pair.starts_with(SESSION_COOKIE) && pair.len() > SESSION_COOKIE.len() + 1)
        .map(str::to_string)
}

// ============ Client ============

/// Logged-in vim25 session.
pub struct VimClient {
    http: Client,
    url: String,
    cookie: String,
    content: ServiceContent,
}

struct SoapReply {
    payload: XmlNode,
    cookie: Option<String>,
}

fn post(
    http: &Client,
    url: &str,
    cookie: Option<&str>,
    body: String,
) -> Result<SoapReply, BackendError> {
    let mut request = http
        .post(url)
        .header(CONTENT_TYPE, "text/xml; charset=utf-8")
        .header("SOAPAction", SOAP_ACTION)
        .body(body);
    if let Some(cookie) = cookie {
        request = request.header(COOKIE, cookie);
    }

    let resp = request
        .send()
        .map_err(|e| BackendError::Transport(format!("{}: {}", url, e)))?;
    let status = resp.status();
    let cookie = session_cookie(resp.headers());
    let text = resp
        .text()
        .map_err(|e| BackendError::Transport(format!("{}: {}", url, e)))?;

    let http_error = || BackendError::Http {
        status: status.as_u16(),
        body: text.chars().take(500).collect(),
    };

    // Faults arrive with HTTP 500 and a SOAP body; prefer the fault.
    match parse_xml(&text).and_then(body_payload) {
        Err(BackendError::Decode(_)) if !status.is_success() => Err(http_error()),
        Err(e) => Err(e),
        Ok(_) if !status.is_success() => Err(http_error()),
        Ok(payload) => Ok(SoapReply { payload, cookie }),
    }
}

impl VimClient {
    /// Open a session. `Ok(None)` when the server accepted the login but
    /// returned no session cookie.
    pub fn login(http: Client, ctx: &ConnectionContext) -> Result<Option<Self>, BackendError> {
        let url = format!("https://{}:{}/sdk", ctx.hostname, ctx.port);

        let reply = post(&http, &url, None, retrieve_service_content_body())?;
        let content = parse_service_content(&reply.payload)?;

        let reply = post(
            &http,
            &url,
            None,
            login_body(&content.session_manager, &ctx.username, &ctx.password),
        )?;
        let Some(cookie) = reply.cookie else {
            return Ok(None);
        };

        tracing::debug!(url = %url, "vim25 session established");
        Ok(Some(Self {
            http,
            url,
            cookie,
            content,
        }))
    }

    pub fn logout(&self) -> Result<(), BackendError> {
        post(
            &self.http,
            &self.url,
            Some(&self.cookie),
            logout_body(&self.content.session_manager),
        )?;
        Ok(())
    }

    fn retrieve(
        &self,
        object_type: &str,
        moid: &str,
        paths: &[&str],
    ) -> Result<Option<HashMap<String, PropertyValue>>, BackendError> {
        let body =
            retrieve_properties_body(&self.content.property_collector, object_type, moid, paths);
        let reply = post(&self.http, &self.url, Some(&self.cookie), body)?;
        Ok(parse_prop_set(&reply.payload))
    }

    /// Fetch one property outside the typed schema.
    ///
    /// Paths the server rejects are retried with their parent path, so
    /// `guest.net.0.ipAddress` is stored under `guest.net`. Server faults
    /// are absorbed; transport failures are not.
    fn retrieve_extra(
        &self,
        moid: &str,
        path: &str,
    ) -> Result<Option<(String, PropertyValue)>, BackendError> {
        let mut candidate = path;
        loop {
            match self.retrieve("VirtualMachine", moid, &[candidate]) {
                Ok(Some(mut props)) => {
                    return Ok(props
                        .remove(candidate)
                        .map(|value| (candidate.to_string(), value)))
                }
                Ok(None) => return Ok(None),
                Err(
                    e @ (BackendError::Transport(_)
                    | BackendError::Http { .. }
                    | BackendError::Decode(_)),
                ) => return Err(e),
                Err(BackendError::InvalidProperty(_)) => match candidate.rsplit_once('.') {
                    Some((parent, _)) => candidate = parent,
                    None => return Ok(None),
                },
                Err(e) => {
                    tracing::debug!(vm = %moid, path = %path, "property not readable: {}", e);
                    return Ok(None);
                }
            }
        }
    }
}

impl VimApi for VimClient {
    fn retrieve_vm(
        &self,
        vm: &VmRef,
        extra_properties: &[String],
    ) -> Result<VirtualMachine, BackendError> {
        let props = self
            .retrieve("VirtualMachine", &vm.id, &TYPED_PATHS)?
            .ok_or_else(|| BackendError::NotFound(vm.id.clone()))?;
        let mut machine = vm_from_props(&vm.id, &props);

        for path in extra_properties {
            if let Some((stored, value)) = self.retrieve_extra(&vm.id, path)? {
                machine.other.insert(stored, value);
            }
        }
        Ok(machine)
    }

    fn custom_field_defs(&self) -> Result<Vec<CustomFieldDef>, BackendError> {
        let Some(manager) = self.content.custom_fields_manager.as_deref() else {
            return Ok(Vec::new());
        };
        let props = self
            .retrieve("CustomFieldsManager", manager, &["field"])?
            .unwrap_or_default();
        let defs = match props.get("field") {
            Some(PropertyValue::List(items)) => items.iter().filter_map(custom_field_def).collect(),
            Some(single @ PropertyValue::Object(_)) => {
                custom_field_def(single).into_iter().collect()
            }
            _ => Vec::new(),
        };
        Ok(defs)
    }
}

fn custom_field_def(value: &PropertyValue) -> Option<CustomFieldDef> {
    Some(CustomFieldDef {
        key: i32::try_from(value.attribute("key")?.as_i64()?).ok()?,
        name: value.attribute("name")?.as_str()?.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const VM_REPLY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns:xsd="http://www.w3.org/2001/XMLSchema" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
<soapenv:Body>
<RetrievePropertiesExResponse xmlns="urn:vim25">
<returnval>
<objects>
<obj type="VirtualMachine">vm-42</obj>
<propSet><name>name</name><val xsi:type="xsd:string">web1</val></propSet>
<propSet><name>config.uuid</name><val xsi:type="xsd:string">u1</val></propSet>
<propSet><name>config.guestId</name><val xsi:type="xsd:string">otherLinux64Guest</val></propSet>
<propSet><name>config.template</name><val xsi:type="xsd:boolean">false</val></propSet>
<propSet><name>config.hardware.numCPU</name><val xsi:type="xsd:int">4</val></propSet>
<propSet><name>guest.ipAddress</name><val xsi:type="xsd:string">10.0.0.5</val></propSet>
<propSet><name>runtime.powerState</name><val xsi:type="VirtualMachinePowerState">poweredOn</val></propSet>
<propSet><name>customValue</name><val xsi:type="ArrayOfCustomFieldValue">
<CustomFieldValue xsi:type="CustomFieldStringValue"><key>101</key><value>ops &amp; infra</value></CustomFieldValue>
</val></propSet>
</objects>
</returnval>
</RetrievePropertiesExResponse>
</soapenv:Body>
</soapenv:Envelope>"#;

    fn payload(xml: &str) -> Result<XmlNode, BackendError> {
        parse_xml(xml).and_then(body_payload)
    }

    #[test]
    fn test_parse_xml_tree() {
        let root = parse_xml(r#"<a xmlns:xsi="x"><b xsi:type="xsd:int">7</b><c type="Folder">group-d1</c><d/></a>"#).unwrap();
        assert_eq!(root.name, "a");
        assert_eq!(root.children.len(), 3);
        assert_eq!(root.child("b").unwrap().xsi_type.as_deref(), Some("int"));
        assert_eq!(root.child("c").unwrap().mo_type.as_deref(), Some("Folder"));
        assert_eq!(root.child_text("c"), Some("group-d1"));
    }

    #[test]
    fn test_parse_xml_rejects_garbage() {
        assert!(matches!(parse_xml("<a><b></a>"), Err(BackendError::Decode(_))));
        assert!(matches!(parse_xml(""), Err(BackendError::Decode(_))));
    }

    #[test]
    fn test_vm_from_reply() {
        let props = parse_prop_set(&payload(VM_REPLY).unwrap()).unwrap();
        let vm = vm_from_props("vm-42", &props);

        assert_eq!(vm.host_key().as_deref(), Some("web1_u1"));
        assert_eq!(vm.power_state(), "poweredOn");
        assert_eq!(vm.guest_id(), Some("otherLinux64Guest"));
        assert_eq!(vm.ip_address(), Some("10.0.0.5"));
        let config = vm.config.as_ref().unwrap();
        assert_eq!(config.template, Some(false));
        assert_eq!(config.hardware.num_cpu, Some(4));
        assert_eq!(
            vm.custom_value,
            vec![CustomFieldValue {
                key: 101,
                value: "ops & infra".to_string()
            }]
        );
    }

    #[test]
    fn test_missing_uuid_means_orphan() {
        let mut props = HashMap::new();
        props.insert("name".to_string(), PropertyValue::from("ghost"));
        let vm = vm_from_props("vm-9", &props);
        assert!(vm.config.is_none());
        assert!(vm.host_key().is_none());
    }

    #[test]
    fn test_nested_data_object() {
        let node = parse_xml(
            r#"<val xmlns:xsi="x" xsi:type="VirtualMachineConfigInfo"><name>web1</name><hardware><numCPU>2</numCPU><device><key>1</key></device><device><key>2</key></device></hardware></val>"#,
        )
        .unwrap();
        let value = to_property(&node);
        assert_eq!(value.attribute("name").and_then(PropertyValue::as_str), Some("web1"));
        let hardware = value.attribute("hardware").unwrap();
        assert_eq!(hardware.attribute("numCPU").and_then(PropertyValue::as_i64), Some(2));
        match hardware.attribute("device") {
            Some(PropertyValue::List(devices)) => assert_eq!(devices.len(), 2),
            other => panic!("expected device list, got {:?}", other),
        }
    }

    #[test]
    fn test_array_of_strings() {
        let node = parse_xml(
            r#"<val xmlns:xsi="x" xsi:type="ArrayOfString"><string>a</string><string>b</string></val>"#,
        )
        .unwrap();
        assert_eq!(
            to_property(&node),
            PropertyValue::List(vec!["a".into(), "b".into()])
        );

        let node = parse_xml(r#"<val xmlns:xsi="x" xsi:type="ArrayOfInt"><int>4000</int></val>"#).unwrap();
        assert_eq!(to_property(&node), PropertyValue::List(vec![PropertyValue::Int(4000)]));
    }

    #[test]
    fn test_untyped_leaves_flatten_to_typed_json() {
        let node = parse_xml(
            r#"<val xmlns:xsi="x" xsi:type="VirtualMachineQuickStats"><overallCpuUsage>123</overallCpuUsage><installBootRequired>false</installBootRequired><guestHeartbeatStatus>green</guestHeartbeatStatus><host type="HostSystem">1</host></val>"#,
        )
        .unwrap();
        assert_eq!(
            vm_inventory_core::property::flatten(&to_property(&node)),
            serde_json::json!({
                "guestheartbeatstatus": "green",
                "host": "1",
                "installbootrequired": false,
                "overallcpuusage": 123,
            })
        );
    }

    #[test]
    fn test_numeric_custom_value_stays_text() {
        let node = parse_xml(
            r#"<val xmlns:xsi="x" xsi:type="ArrayOfCustomFieldValue"><CustomFieldValue xsi:type="CustomFieldStringValue"><key>7</key><value>2024</value></CustomFieldValue></val>"#,
        )
        .unwrap();
        let mut props = HashMap::new();
        props.insert(CUSTOM_VALUE.to_string(), to_property(&node));
        let vm = vm_from_props("vm-1", &props);
        assert_eq!(
            vm.custom_value,
            vec![CustomFieldValue {
                key: 7,
                value: "2024".to_string()
            }]
        );
    }

    #[test]
    fn test_fault_classification() {
        let fault = |detail: &str| {
            format!(
                r#"<soapenv:Envelope xmlns:soapenv="s" xmlns:xsi="x"><soapenv:Body><soapenv:Fault><faultcode>ServerFaultCode</faultcode><faultstring>nope</faultstring><detail>{}</detail></soapenv:Fault></soapenv:Body></soapenv:Envelope>"#,
                detail
            )
        };

        let err = payload(&fault(r#"<InvalidLoginFault xsi:type="InvalidLogin"/>"#)).unwrap_err();
        assert_eq!(err, BackendError::InvalidLogin("nope".to_string()));

        let err = payload(&fault(r#"<NoPermissionFault xsi:type="NoPermission"></NoPermissionFault>"#)).unwrap_err();
        assert_eq!(err, BackendError::NoPermission("nope".to_string()));

        let err = payload(&fault(r#"<InvalidPropertyFault xsi:type="InvalidProperty"><name>x</name></InvalidPropertyFault>"#)).unwrap_err();
        assert_eq!(err, BackendError::InvalidProperty("nope".to_string()));

        let err = payload(&fault(r#"<SystemErrorFault xsi:type="SystemError"/>"#)).unwrap_err();
        assert_eq!(
            err,
            BackendError::Fault {
                kind: "SystemError".to_string(),
                message: "nope".to_string()
            }
        );
    }

    #[test]
    fn test_service_content() {
        let xml = r#"<soapenv:Envelope xmlns:soapenv="s"><soapenv:Body><RetrieveServiceContentResponse><returnval><rootFolder type="Folder">group-d1</rootFolder><propertyCollector type="PropertyCollector">propertyCollector</propertyCollector><sessionManager type="SessionManager">SessionManager</sessionManager><customFieldsManager type="CustomFieldsManager">CustomFieldsManager</customFieldsManager></returnval></RetrieveServiceContentResponse></soapenv:Body></soapenv:Envelope>"#;
        let content = parse_service_content(&payload(xml).unwrap()).unwrap();
        assert_eq!(content.property_collector, "propertyCollector");
        assert_eq!(content.session_manager, "SessionManager");
        assert_eq!(content.custom_fields_manager.as_deref(), Some("CustomFieldsManager"));
    }

    #[test]
    fn test_login_body_escapes_credentials() {
        let body = login_body("SessionManager", "admin@vsphere.local", "p<&>w");
        assert!(body.contains("<password>p&lt;&amp;&gt;w</password>"));
        assert!(body.contains("<userName>admin@vsphere.local</userName>"));
    }

    #[test]
    fn test_retrieve_body_lists_paths() {
        let body = retrieve_properties_body(
            "propertyCollector",
            "VirtualMachine",
            "vm-1",
            &["name", "config.uuid"],
        );
        assert!(body.contains("<pathSet>name</pathSet><pathSet>config.uuid</pathSet>"));
        assert!(body.contains(r#"<obj type="VirtualMachine">vm-1</obj>"#));
    }

    #[test]
    fn test_session_cookie() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.append(SET_COOKIE, "other=1; Path=/".parse().unwrap());
        headers.append(
            SET_COOKIE,
            "vmware_soap_session=\"abc123\"; Path=/; HttpOnly; Secure".parse().unwrap(),
        );
        assert_eq!(
            session_cookie(&headers).as_deref(),
            Some("vmware_soap_session=\"abc123\"")
        );
        assert!(session_cookie(&reqwest::header::HeaderMap::new()).is_none());
    }
}
