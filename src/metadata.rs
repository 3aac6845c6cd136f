//! `$metadata` (EDMX/CSDL) parsing.
//!
//! Streams the document with `quick-xml` and produces one [`EntitySchema`]
//! per entity set: the entity type's ordered key, its properties, and the
//! set's mutation capabilities.
//!
//! Capabilities are read from two places:
//!
//! - OData V2 SAP annotations on the set: `sap:creatable`,
//!   `sap:updatable`, `sap:deletable` (`"false"` disables);
//! - OData V4 inline capability annotations inside the set:
//!   `InsertRestrictions/Insertable`, `UpdateRestrictions/Updatable`,
//!   `DeleteRestrictions/Deletable`.
//!
//! Anything not declared stays permitted. If a document declares entity
//! types but no entity container, each type is exposed under a set of the
//! same name.

use anyhow::{bail, Result};
use quick_xml::events::{BytesStart, Event};
use std::collections::HashMap;

use crate::models::{Capabilities, EntitySchema, PropertySchema};

#[derive(Default)]
struct TypeBuilder {
    name: String,
    keys: Vec<String>,
    properties: Vec<PropertySchema>,
}

struct SetBuilder {
    name: String,
    entity_type: String,
    capabilities: Capabilities,
}

#[derive(Default)]
struct ParseState {
    types: Vec<TypeBuilder>,
    sets: Vec<SetBuilder>,
    current_type: Option<TypeBuilder>,
    in_key: bool,
    in_set: bool,
    current_term: Option<String>,
}

/// Local-name → value map of an element's attributes.
fn attributes(e: &BytesStart) -> HashMap<String, String> {
    e.attributes()
        .filter_map(|a| a.ok())
        .filter_map(|a| {
            let key = String::from_utf8_lossy(a.key.local_name().as_ref()).into_owned();
            let value = a.unescape_value().ok()?.into_owned();
            Some((key, value))
        })
        .collect()
}

fn is_false(value: Option<&String>) -> bool {
    value.map(|v| v.eq_ignore_ascii_case("false")).unwrap_or(false)
}

fn unqualified(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

impl ParseState {
    fn open(&mut self, e: &BytesStart, is_empty: bool) {
        let attrs = attributes(e);
        match e.local_name().as_ref() {
            b"EntityType" => {
                let builder = TypeBuilder {
                    name: attrs.get("Name").cloned().unwrap_or_default(),
                    ..Default::default()
                };
                if is_empty {
                    self.types.push(builder);
                } else {
                    self.current_type = Some(builder);
                }
            }
            b"Key" if !is_empty => self.in_key = true,
            b"PropertyRef" if self.in_key => {
                if let (Some(t), Some(name)) = (self.current_type.as_mut(), attrs.get("Name")) {
                    t.keys.push(name.clone());
                }
            }
            b"Property" => {
                if let (Some(t), Some(name)) = (self.current_type.as_mut(), attrs.get("Name")) {
                    t.properties.push(PropertySchema {
                        name: name.clone(),
                        type_name: attrs.get("Type").cloned().unwrap_or_default(),
                        nullable: !is_false(attrs.get("Nullable")),
                        max_length: attrs.get("MaxLength").and_then(|m| m.parse().ok()),
                        label: attrs.get("label").cloned(),
                    });
                }
            }
            b"EntitySet" => {
                let capabilities = Capabilities {
                    creatable: !is_false(attrs.get("creatable")),
                    updatable: !is_false(attrs.get("updatable")),
                    deletable: !is_false(attrs.get("deletable")),
                };
                self.sets.push(SetBuilder {
                    name: attrs.get("Name").cloned().unwrap_or_default(),
                    entity_type: unqualified(attrs.get("EntityType").map(String::as_str).unwrap_or(""))
                        .to_string(),
                    capabilities,
                });
                self.in_set = !is_empty;
            }
            b"Annotation" if self.in_set && !is_empty => {
                self.current_term = attrs.get("Term").cloned();
            }
            b"PropertyValue" if self.in_set => {
                let (Some(term), Some(property)) = (self.current_term.as_deref(), attrs.get("Property"))
                else {
                    return;
                };
                if !is_false(attrs.get("Bool")) {
                    return;
                }
                let Some(set) = self.sets.last_mut() else {
                    return;
                };
                match (unqualified(term), property.as_str()) {
                    ("InsertRestrictions", "Insertable") => set.capabilities.creatable = false,
                    ("UpdateRestrictions", "Updatable") => set.capabilities.updatable = false,
                    ("DeleteRestrictions", "Deletable") => set.capabilities.deletable = false,
                    _ => {}
                }
            }
            _ => {}
        }
    }

    fn close(&mut self, local_name: &[u8]) {
        match local_name {
            b"EntityType" => {
                if let Some(t) = self.current_type.take() {
                    self.types.push(t);
                }
            }
            b"Key" => self.in_key = false,
            b"EntitySet" => self.in_set = false,
            b"Annotation" => self.current_term = None,
            _ => {}
        }
    }

    fn finish(self) -> Vec<EntitySchema> {
        let to_schema = |t: &TypeBuilder, set: &str, capabilities: Capabilities| EntitySchema {
            entity_name: t.name.clone(),
            entity_set: set.to_string(),
            keys: t.keys.clone(),
            properties: t.properties.clone(),
            capabilities,
        };

        if self.sets.is_empty() {
            return self
                .types
                .iter()
                .map(|t| to_schema(t, &t.name, Capabilities::default()))
                .collect();
        }

        self.sets
            .iter()
            .filter_map(|set| {
                let t = self.types.iter().find(|t| t.name == set.entity_type)?;
                Some(to_schema(t, &set.name, set.capabilities))
            })
            .collect()
    }
}

/// Parse an EDMX document into entity schemas, in entity-set order.
pub fn parse_edmx(xml: &str) -> Result<Vec<EntitySchema>> {
    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut state = ParseState::default();
    let mut saw_root = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                saw_root = true;
                state.open(&e, false);
            }
            Ok(Event::Empty(e)) => {
                saw_root = true;
                state.open(&e, true);
            }
            Ok(Event::End(e)) => state.close(e.local_name().as_ref()),
            Ok(Event::Eof) => break,
            Err(e) => bail!(
                "malformed $metadata at byte {}: {}",
                reader.buffer_position(),
                e
            ),
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        bail!("$metadata document is empty");
    }
    Ok(state.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    const V2: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<edmx:Edmx Version="1.0" xmlns:edmx="http://schemas.microsoft.com/ado/2007/06/edmx"
    xmlns:sap="http://www.sap.com/Protocols/SAPData">
  <edmx:DataServices>
    <Schema Namespace="ZFAR_SRV" xmlns="http://schemas.microsoft.com/ado/2008/09/edm">
      <EntityType Name="Item" sap:content-version="1">
        <Key>
          <PropertyRef Name="CompanyCode"/>
          <PropertyRef Name="AccountingDocument"/>
          <PropertyRef Name="FiscalYear"/>
        </Key>
        <Property Name="CompanyCode" Type="Edm.String" Nullable="false" MaxLength="4" sap:label="Company Code"/>
        <Property Name="AccountingDocument" Type="Edm.String" Nullable="false" MaxLength="10"/>
        <Property Name="FiscalYear" Type="Edm.String" Nullable="false" MaxLength="4"/>
        <Property Name="Amount" Type="Edm.Decimal" Precision="23" Scale="3"/>
      </EntityType>
      <EntityType Name="Customer">
        <Key><PropertyRef Name="Customer"/></Key>
        <Property Name="Customer" Type="Edm.String" Nullable="false" MaxLength="10"/>
        <Property Name="EmailAddress" Type="Edm.String" MaxLength="max"/>
      </EntityType>
      <EntityContainer Name="ZFAR_SRV_Entities" m:IsDefaultEntityContainer="true"
          xmlns:m="http://schemas.microsoft.com/ado/2007/08/dataservices/metadata">
        <EntitySet Name="Items" EntityType="ZFAR_SRV.Item" sap:creatable="false" sap:updatable="false" sap:deletable="false"/>
        <EntitySet Name="Customers" EntityType="ZFAR_SRV.Customer"/>
      </EntityContainer>
    </Schema>
  </edmx:DataServices>
</edmx:Edmx>"#;

    #[test]
    fn test_v2_keys_properties_and_capabilities() {
        let schemas = parse_edmx(V2).unwrap();
        assert_eq!(schemas.len(), 2);

        let item = &schemas[0];
        assert_eq!(item.entity_name, "Item");
        assert_eq!(item.entity_set, "Items");
        assert_eq!(item.keys, vec!["CompanyCode", "AccountingDocument", "FiscalYear"]);
        assert_eq!(item.properties.len(), 4);
        let cc = item.property("CompanyCode").unwrap();
        assert!(!cc.nullable);
        assert_eq!(cc.max_length, Some(4));
        assert_eq!(cc.label.as_deref(), Some("Company Code"));
        assert!(item.property("Amount").unwrap().nullable);
        assert!(!item.capabilities.creatable);
        assert!(!item.capabilities.updatable);
        assert!(!item.capabilities.deletable);

        let customer = &schemas[1];
        assert_eq!(customer.capabilities, Capabilities::default());
        assert_eq!(customer.property("EmailAddress").unwrap().max_length, None);
    }

    #[test]
    fn test_v4_inline_capability_annotations() {
        let xml = r#"<edmx:Edmx Version="4.0" xmlns:edmx="http://docs.oasis-open.org/odata/ns/edmx">
  <edmx:DataServices>
    <Schema Namespace="com.example" xmlns="http://docs.oasis-open.org/odata/ns/edm">
      <EntityType Name="Order">
        <Key><PropertyRef Name="ID"/></Key>
        <Property Name="ID" Type="Edm.Int32" Nullable="false"/>
      </EntityType>
      <EntityContainer Name="Container">
        <EntitySet Name="Orders" EntityType="com.example.Order">
          <Annotation Term="Org.OData.Capabilities.V1.InsertRestrictions">
            <Record><PropertyValue Property="Insertable" Bool="false"/></Record>
          </Annotation>
          <Annotation Term="Org.OData.Capabilities.V1.DeleteRestrictions">
            <Record><PropertyValue Property="Deletable" Bool="true"/></Record>
          </Annotation>
        </EntitySet>
      </EntityContainer>
    </Schema>
  </edmx:DataServices>
</edmx:Edmx>"#;
        let schemas = parse_edmx(xml).unwrap();
        assert_eq!(schemas.len(), 1);
        let caps = schemas[0].capabilities;
        assert!(!caps.creatable);
        assert!(caps.updatable);
        assert!(caps.deletable);
    }

    #[test]
    fn test_types_without_container() {
        let xml = r#"<Schema><EntityType Name="Thing"><Key><PropertyRef Name="Id"/></Key><Property Name="Id" Type="Edm.String"/></EntityType></Schema>"#;
        let schemas = parse_edmx(xml).unwrap();
        assert_eq!(schemas[0].entity_set, "Thing");
        assert_eq!(schemas[0].keys, vec!["Id"]);
    }

    #[test]
    fn test_malformed_document() {
        assert!(parse_edmx("").is_err());
        assert!(parse_edmx("<Schema><EntityType Name=\"A\"></Schema>").is_err());
    }
}
