//! Built-in mapping tables, used when the mapping file has no section for a
//! kind.

use oxsync_remote::types::ObjectKind;

use super::{MappingTable, PropertyMapping, SpecialHandling};

/// Built-in table for `kind`.
pub fn builtin_table(kind: ObjectKind) -> MappingTable {
    match kind {
        ObjectKind::Context => context(),
        ObjectKind::User => user(),
        ObjectKind::Group => group(),
        ObjectKind::Resource => resource(),
        ObjectKind::SecondaryAccount => functional_account(),
    }
}

fn table(entries: Vec<(&str, PropertyMapping)>) -> MappingTable {
    entries
        .into_iter()
        .map(|(property, mapping)| (property.to_string(), mapping))
        .collect()
}

fn context() -> MappingTable {
    table(vec![
        ("name", PropertyMapping::from_attribute("name").required()),
        ("max_quota", PropertyMapping::from_attribute("oxQuota")),
    ])
}

fn user() -> MappingTable {
    table(vec![
        ("name", PropertyMapping::from_attribute("username").required()),
        (
            "display_name",
            PropertyMapping::from_attribute("oxDisplayName")
                .with_alternates(["displayName", "username"]),
        ),
        ("given_name", PropertyMapping::from_attribute("firstname")),
        ("sur_name", PropertyMapping::from_attribute("lastname").required()),
        (
            "primary_email",
            PropertyMapping::from_attribute("mailPrimaryAddress").required(),
        ),
        ("email1", PropertyMapping::from_attribute("mailPrimaryAddress")),
        ("language", PropertyMapping::from_attribute("oxLanguage")),
        ("timezone", PropertyMapping::from_attribute("oxTimeZone")),
        ("title", PropertyMapping::from_attribute("title")),
        ("company", PropertyMapping::from_attribute("organisation")),
        ("department", PropertyMapping::from_attribute("departmentNumber")),
        ("street_business", PropertyMapping::from_attribute("street")),
        ("city_business", PropertyMapping::from_attribute("city")),
        ("postal_code_business", PropertyMapping::from_attribute("postcode")),
        (
            "telephone_business1",
            PropertyMapping::from_attribute("phone").at_position(0),
        ),
        (
            "telephone_business2",
            PropertyMapping::from_attribute("phone").at_position(1),
        ),
        (
            "cellular_telephone1",
            PropertyMapping::from_attribute("mobileTelephoneNumber"),
        ),
        (
            "birthday",
            PropertyMapping::from_attribute("birthday").with_special(SpecialHandling::Date),
        ),
        (
            "image1",
            PropertyMapping::from_attribute("jpegPhoto").with_special(SpecialHandling::Image),
        ),
        (
            "imap_server",
            PropertyMapping::from_attribute("oxImapServer").with_special(SpecialHandling::ImapUrl),
        ),
        (
            "smtp_server",
            PropertyMapping::from_attribute("oxSmtpServer").with_special(SpecialHandling::SmtpUrl),
        ),
        ("note", PropertyMapping::from_attribute("description")),
    ])
}

fn group() -> MappingTable {
    table(vec![
        ("name", PropertyMapping::from_attribute("name").required()),
        ("display_name", PropertyMapping::from_attribute("name")),
        ("note", PropertyMapping::from_attribute("description")),
    ])
}

fn resource() -> MappingTable {
    table(vec![
        ("name", PropertyMapping::from_attribute("name").required()),
        (
            "display_name",
            PropertyMapping::from_attribute("displayname").with_alternates(["name"]),
        ),
        ("description", PropertyMapping::from_attribute("description")),
        (
            "mail",
            PropertyMapping::from_attribute("resourceMailAddress").required(),
        ),
    ])
}

fn functional_account() -> MappingTable {
    table(vec![
        ("name", PropertyMapping::from_attribute("name").required()),
        (
            "primary_address",
            PropertyMapping::from_attribute("mailPrimaryAddress").required(),
        ),
        (
            "personal",
            PropertyMapping::from_attribute("personal").with_alternates(["name"]),
        ),
    ])
}
