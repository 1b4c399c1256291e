/**
 * CONFIGURATION DOCUMENT - Persistance JSON + échange CSV/XML
 *
 * RÔLE :
 * Document unique décrivant le poste : connexion au serveur PI, liste des
 * interfaces, points (enregistrements JSON opaques, repassés tels quels) et
 * paramètres texte. Le JSON est le format de référence ; le XML transporte
 * le même document, le CSV ne couvre que la liste des interfaces (tableur).
 *
 * FONCTIONNEMENT :
 * - load() : fichier absent => document vide, pas une erreur
 * - save() : écrit dans un fichier temporaire voisin puis rename
 * - CSV : en-tête obligatoire, colonnes repérées par nom, valeurs gardées
 *   telles quelles (seuls les noms de colonnes sont nettoyés)
 * - XML : racine <configuration>, un point = son JSON compact en texte
 */

use crate::models::{Interface, InterfaceStatus, InterfaceType};
use crate::network::DEFAULT_PI_PORT;
use crate::registry::InterfaceRegistry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV line {line}: {message}")]
    Csv { line: usize, message: String },
    #[error("CSV writer error: {0}")]
    CsvWrite(#[from] csv::Error),
    #[error("XML error: {0}")]
    Xml(String),
    #[error("Unknown document format: {0}")]
    UnknownFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Json,
    Csv,
    Xml,
}

impl DocumentFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            DocumentFormat::Json => "application/json",
            DocumentFormat::Csv => "text/csv",
            DocumentFormat::Xml => "application/xml",
        }
    }
}

impl FromStr for DocumentFormat {
    type Err = DocumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(DocumentFormat::Json),
            "csv" => Ok(DocumentFormat::Csv),
            "xml" => Ok(DocumentFormat::Xml),
            other => Err(DocumentError::UnknownFormat(other.to_string())),
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentFormat::Json => f.write_str("json"),
            DocumentFormat::Csv => f.write_str("csv"),
            DocumentFormat::Xml => f.write_str("xml"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConnection {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
}

impl Default for ServerConnection {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: DEFAULT_PI_PORT,
            username: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigurationDocument {
    pub server: ServerConnection,
    pub interfaces: Vec<Interface>,
    pub points: Vec<serde_json::Value>,
    pub settings: BTreeMap<String, String>,
}

impl ConfigurationDocument {
    pub fn to_json(&self) -> Result<String, DocumentError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(txt: &str) -> Result<Self, DocumentError> {
        let mut doc: ConfigurationDocument = serde_json::from_str(txt)?;
        for iface in &mut doc.interfaces {
            fill_service_name(iface);
        }
        Ok(doc)
    }

    /// Copie du document avec la liste d'interfaces courante du registre
    pub fn snapshot(&self, registry: &InterfaceRegistry) -> Self {
        Self {
            interfaces: registry.list(),
            ..self.clone()
        }
    }

    pub fn to_xml(&self) -> Result<String, DocumentError> {
        let xml = XmlDocument::try_from(self)?;
        let mut out = String::new();
        let mut ser = quick_xml::se::Serializer::with_root(&mut out, Some(XML_ROOT)).map_err(xml_error)?;
        ser.indent(' ', 2);
        xml.serialize(ser).map_err(xml_error)?;
        Ok(out)
    }

    pub fn from_xml(txt: &str) -> Result<Self, DocumentError> {
        let xml: XmlDocument = quick_xml::de::from_str(txt).map_err(xml_error)?;
        xml.into_document()
    }

    pub async fn load(path: &Path) -> Result<Self, DocumentError> {
        if !path.exists() {
            info!(path = %path.display(), "no configuration document, starting empty");
            return Ok(Self::default());
        }
        let txt = tokio::fs::read_to_string(path).await?;
        let doc = Self::from_json(&txt)?;
        debug!(path = %path.display(), interfaces = doc.interfaces.len(), "configuration document loaded");
        Ok(doc)
    }

    pub async fn save(&self, path: &Path) -> Result<(), DocumentError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, self.to_json()?).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), "configuration document saved");
        Ok(())
    }
}

fn fill_service_name(iface: &mut Interface) {
    if iface.service_name.trim().is_empty() {
        iface.service_name = iface.name.clone();
    }
}

const CSV_COLUMNS: [&str; 7] = [
    "name",
    "type",
    "status",
    "service_name",
    "enabled",
    "description",
    "point_count",
];

/// Exporte la liste des interfaces, une ligne par interface après l'en-tête
pub fn interfaces_to_csv(interfaces: &[Interface]) -> Result<String, DocumentError> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());
    writer.write_record(CSV_COLUMNS)?;
    for iface in interfaces {
        writer.write_record([
            iface.name.clone(),
            iface.interface_type.to_string(),
            iface.status.to_string(),
            iface.service_name.clone(),
            iface.enabled.to_string(),
            iface.description.clone().unwrap_or_default(),
            iface.point_count.to_string(),
        ])?;
    }
    let bytes = writer.into_inner().map_err(|e| DocumentError::Io(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Importe des interfaces ; seules `name` et `type` sont obligatoires
pub fn interfaces_from_csv(txt: &str) -> Result<Vec<Interface>, DocumentError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(txt.as_bytes());

    let header = reader.headers().map_err(|e| csv_error(1, e))?.clone();
    let index: HashMap<String, usize> = header
        .iter()
        .enumerate()
        .map(|(i, h)| (h.to_ascii_lowercase(), i))
        .collect();
    for required in ["name", "type"] {
        if !index.contains_key(required) {
            return Err(DocumentError::Csv {
                line: 1,
                message: format!("missing column '{required}'"),
            });
        }
    }

    let mut interfaces = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| {
            let line = e.position().map_or(0, |p| p.line() as usize);
            csv_error(line, e)
        })?;
        let line = record.position().map_or(0, |p| p.line() as usize);
        if record.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        // une cellule blanche vaut absence, sinon la valeur est gardée intacte
        let cell = |col: &str| {
            index
                .get(col)
                .and_then(|&i| record.get(i))
                .filter(|s| !s.trim().is_empty())
        };
        let bad = |message: String| DocumentError::Csv { line, message };

        let name = cell("name").ok_or_else(|| bad("empty name".into()))?;
        let interface_type = cell("type")
            .ok_or_else(|| bad("empty type".into()))?
            .trim()
            .parse::<InterfaceType>()
            .map_err(bad)?;

        let mut iface = Interface::new(name, interface_type);
        if let Some(status) = cell("status") {
            iface.status = status.trim().parse::<InterfaceStatus>().map_err(bad)?;
        }
        if let Some(service) = cell("service_name") {
            iface.service_name = service.to_string();
        }
        if let Some(enabled) = cell("enabled") {
            iface.enabled = parse_bool(enabled.trim()).ok_or_else(|| bad(format!("invalid enabled '{enabled}'")))?;
        }
        iface.description = cell("description").map(str::to_string);
        if let Some(count) = cell("point_count") {
            iface.point_count = count
                .trim()
                .parse()
                .map_err(|_| bad(format!("invalid point_count '{count}'")))?;
        }
        interfaces.push(iface);
    }
    Ok(interfaces)
}

fn csv_error(line: usize, e: csv::Error) -> DocumentError {
    DocumentError::Csv {
        line,
        message: e.to_string(),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Some(true),
        "false" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

const XML_ROOT: &str = "configuration";

fn xml_error(e: impl fmt::Display) -> DocumentError {
    DocumentError::Xml(e.to_string())
}

// Forme XML du document : attributs pour les scalaires, listes enveloppées
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct XmlDocument {
    server: XmlServer,
    interfaces: XmlInterfaces,
    points: XmlPoints,
    settings: XmlSettings,
}

#[derive(Debug, Serialize, Deserialize)]
struct XmlServer {
    #[serde(rename = "@host")]
    host: String,
    #[serde(rename = "@port")]
    port: u16,
    #[serde(rename = "@username", default, skip_serializing_if = "Option::is_none")]
    username: Option<String>,
}

impl Default for XmlServer {
    fn default() -> Self {
        let server = ServerConnection::default();
        Self {
            host: server.host,
            port: server.port,
            username: server.username,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct XmlInterfaces {
    #[serde(rename = "interface", default)]
    items: Vec<XmlInterface>,
}

#[derive(Debug, Serialize, Deserialize)]
struct XmlInterface {
    #[serde(rename = "@id", default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@type")]
    interface_type: String,
    #[serde(rename = "@status", default, skip_serializing_if = "Option::is_none")]
    status: Option<String>,
    #[serde(rename = "@service", default, skip_serializing_if = "Option::is_none")]
    service_name: Option<String>,
    #[serde(rename = "@enabled", default = "default_true")]
    enabled: bool,
    #[serde(rename = "@points", default)]
    point_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(rename = "property", default)]
    properties: Vec<XmlEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct XmlEntry {
    #[serde(rename = "@key")]
    key: String,
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct XmlPoints {
    #[serde(rename = "point", default)]
    items: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct XmlSettings {
    #[serde(rename = "setting", default)]
    items: Vec<XmlEntry>,
}

fn default_true() -> bool {
    true
}

impl TryFrom<&ConfigurationDocument> for XmlDocument {
    type Error = DocumentError;

    fn try_from(doc: &ConfigurationDocument) -> Result<Self, Self::Error> {
        let interfaces = doc
            .interfaces
            .iter()
            .map(|iface| {
                let mut properties: Vec<XmlEntry> = iface
                    .properties
                    .iter()
                    .map(|(key, value)| XmlEntry {
                        key: key.clone(),
                        value: value.clone(),
                    })
                    .collect();
                properties.sort_by(|a, b| a.key.cmp(&b.key));
                XmlInterface {
                    id: Some(iface.id.to_string()),
                    name: iface.name.clone(),
                    interface_type: iface.interface_type.to_string(),
                    status: Some(iface.status.to_string()),
                    service_name: Some(iface.service_name.clone()),
                    enabled: iface.enabled,
                    point_count: iface.point_count,
                    description: iface.description.clone(),
                    properties,
                }
            })
            .collect();
        let points = doc
            .points
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;
        let settings = doc
            .settings
            .iter()
            .map(|(key, value)| XmlEntry {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();

        Ok(XmlDocument {
            server: XmlServer {
                host: doc.server.host.clone(),
                port: doc.server.port,
                username: doc.server.username.clone(),
            },
            interfaces: XmlInterfaces { items: interfaces },
            points: XmlPoints { items: points },
            settings: XmlSettings { items: settings },
        })
    }
}

impl XmlDocument {
    fn into_document(self) -> Result<ConfigurationDocument, DocumentError> {
        let mut interfaces = Vec::with_capacity(self.interfaces.items.len());
        for item in self.interfaces.items {
            let interface_type = item.interface_type.parse::<InterfaceType>().map_err(DocumentError::Xml)?;
            let mut iface = Interface::new(item.name, interface_type);
            if let Some(id) = item.id {
                iface.id = Uuid::parse_str(&id).map_err(xml_error)?;
            }
            if let Some(status) = item.status {
                iface.status = status.parse::<InterfaceStatus>().map_err(DocumentError::Xml)?;
            }
            if let Some(service) = item.service_name {
                iface.service_name = service;
            }
            fill_service_name(&mut iface);
            iface.enabled = item.enabled;
            iface.point_count = item.point_count;
            iface.description = item.description;
            iface.properties = item.properties.into_iter().map(|p| (p.key, p.value)).collect();
            interfaces.push(iface);
        }

        let points = self
            .points
            .items
            .iter()
            .map(|p| serde_json::from_str(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ConfigurationDocument {
            server: ServerConnection {
                host: self.server.host,
                port: self.server.port,
                username: self.server.username,
            },
            interfaces,
            points,
            settings: self.settings.items.into_iter().map(|s| (s.key, s.value)).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> ConfigurationDocument {
        let mut settings = BTreeMap::new();
        settings.insert("site".to_string(), "Plant A".to_string());
        ConfigurationDocument {
            server: ServerConnection {
                host: "piserver01".into(),
                port: 5450,
                username: Some("piadmin".into()),
            },
            interfaces: vec![
                Interface::new("Ping1", InterfaceType::Ping).with_description("LAN ping"),
                Interface::new("OPC, Line 2", InterfaceType::OpcDa)
                    .with_service("opcint2")
                    .with_description("says \"hello\"")
                    .with_point_count(120)
                    .disabled(),
            ],
            points: vec![json!({"tag": "SINUSOID", "pointtype": "float32", "extra": [1, 2]})],
            settings,
        }
    }

    #[test]
    fn test_json_preserves_points_and_fields() {
        let doc = sample();
        let back = ConfigurationDocument::from_json(&doc.to_json().unwrap()).unwrap();
        assert_eq!(back, doc);
        assert_eq!(back.points[0]["extra"], json!([1, 2]));
    }

    #[test]
    fn test_json_minimal_interface_gets_defaults() {
        let txt = r#"{"interfaces": [{"name": "Ufl1", "type": "Ufl"}]}"#;
        let doc = ConfigurationDocument::from_json(txt).unwrap();
        let iface = &doc.interfaces[0];
        assert_eq!(iface.service_name, "Ufl1");
        assert_eq!(iface.status, InterfaceStatus::Stopped);
        assert!(iface.enabled);
        assert_eq!(doc.server.port, 5450);
    }

    #[test]
    fn test_csv_export_import() {
        let doc = sample();
        let csv = interfaces_to_csv(&doc.interfaces).unwrap();
        assert!(csv.starts_with("name,type,status,service_name,enabled,description,point_count\r\n"));
        assert!(csv.contains("\"OPC, Line 2\""));
        assert!(csv.contains("\"says \"\"hello\"\"\""));

        let back = interfaces_from_csv(&csv).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[1].name, "OPC, Line 2");
        assert_eq!(back[1].service_name, "opcint2");
        assert_eq!(back[1].description.as_deref(), Some("says \"hello\""));
        assert_eq!(back[1].point_count, 120);
        assert!(!back[1].enabled);
        assert_eq!(back[0].interface_type, InterfaceType::Ping);
    }

    #[test]
    fn test_csv_keeps_surrounding_spaces() {
        let ifaces = vec![
            Interface::new(" Ping1", InterfaceType::Ping).with_description("  padded  "),
            Interface::new("Ufl1 ", InterfaceType::Ufl).with_service(" ufl-svc"),
        ];
        let back = interfaces_from_csv(&interfaces_to_csv(&ifaces).unwrap()).unwrap();
        assert_eq!(back[0].name, " Ping1");
        assert_eq!(back[0].description.as_deref(), Some("  padded  "));
        assert_eq!(back[1].name, "Ufl1 ");
        assert_eq!(back[1].service_name, " ufl-svc");

        // les colonnes typées tolèrent les espaces, pas les valeurs libres
        let ifaces = interfaces_from_csv(" name , type 
 Perf1 , perfmon 
").unwrap();
        assert_eq!(ifaces[0].name, " Perf1 ");
        assert_eq!(ifaces[0].interface_type, InterfaceType::Perfmon);
    }

    #[test]
    fn test_xml_round_trip() {
        let mut doc = sample();
        doc.interfaces[0] = doc.interfaces[0].clone().with_property("host", "10.0.0.4");
        let xml = doc.to_xml().unwrap();
        assert!(xml.starts_with("<configuration>"));
        assert!(xml.contains("name=\"OPC, Line 2\""));

        let back = ConfigurationDocument::from_xml(&xml).unwrap();
        assert_eq!(back, doc);
        assert_eq!(back.points[0]["extra"], json!([1, 2]));
        assert_eq!(back.interfaces[0].properties["host"], "10.0.0.4");
    }

    #[test]
    fn test_xml_minimal_interface_gets_defaults() {
        let xml = r#"<configuration>
            <server host="pi02" port="5451"/>
            <interfaces><interface name="Ufl1" type="ufl"/></interfaces>
        </configuration>"#;
        let doc = ConfigurationDocument::from_xml(xml).unwrap();
        assert_eq!(doc.server.host, "pi02");
        assert_eq!(doc.server.port, 5451);
        let iface = &doc.interfaces[0];
        assert_eq!(iface.interface_type, InterfaceType::Ufl);
        assert_eq!(iface.service_name, "Ufl1");
        assert_eq!(iface.status, InterfaceStatus::Stopped);
        assert!(iface.enabled);
        assert!(doc.points.is_empty());

        let bad = r#"<configuration><interfaces><interface name="x" type="bogus"/></interfaces></configuration>"#;
        assert!(matches!(ConfigurationDocument::from_xml(bad), Err(DocumentError::Xml(_))));
    }

    #[test]
    fn test_csv_reordered_and_partial_columns() {
        let csv = "Type,Name\nperfmon,Perf1\n\n\"Ping\",\"multi\nline\"\n";
        let ifaces = interfaces_from_csv(csv).unwrap();
        assert_eq!(ifaces.len(), 2);
        assert_eq!(ifaces[0].name, "Perf1");
        assert_eq!(ifaces[0].service_name, "Perf1");
        assert_eq!(ifaces[1].name, "multi\nline");
    }

    #[test]
    fn test_csv_errors_report_line() {
        let err = interfaces_from_csv("name,status\nx,Running\n").unwrap_err();
        assert!(matches!(err, DocumentError::Csv { line: 1, .. }));

        let err = interfaces_from_csv("name,type\nok,Ping\nbad,NotAType\n").unwrap_err();
        assert!(matches!(err, DocumentError::Csv { line: 3, .. }));

        let err = interfaces_from_csv("name,type\n\"open,Ping\n").unwrap_err();
        assert!(matches!(err, DocumentError::Csv { .. }));

        assert!(interfaces_from_csv("").is_err());
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("CSV".parse::<DocumentFormat>().unwrap(), DocumentFormat::Csv);
        assert_eq!(" json ".parse::<DocumentFormat>().unwrap(), DocumentFormat::Json);
        assert_eq!("xml".parse::<DocumentFormat>().unwrap(), DocumentFormat::Xml);
        assert!(matches!("yaml".parse::<DocumentFormat>(), Err(DocumentError::UnknownFormat(_))));
    }

    #[test]
    fn test_snapshot_takes_registry_interfaces() {
        use crate::bus::NotificationBus;
        use std::sync::Arc;

        let registry = InterfaceRegistry::new(Arc::new(NotificationBus::new()));
        registry.register(Interface::new("Rdbms1", InterfaceType::Rdbms)).unwrap();

        let snap = sample().snapshot(&registry);
        assert_eq!(snap.interfaces.len(), 1);
        assert_eq!(snap.interfaces[0].name, "Rdbms1");
        assert_eq!(snap.server.host, "piserver01");
        assert_eq!(snap.points.len(), 1);
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("pilot.json");

        let empty = ConfigurationDocument::load(&path).await.unwrap();
        assert!(empty.interfaces.is_empty());

        let doc = sample();
        doc.save(&path).await.unwrap();
        let loaded = ConfigurationDocument::load(&path).await.unwrap();
        assert_eq!(loaded, doc);
    }
}
