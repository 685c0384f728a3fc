//! Customer payload

use serde::{Deserialize, Serialize};

use super::Geolocation;

/// Business identity and contact details captured in the field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub business_name: String,
    pub contact_person: String,
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
    pub address: String,
    #[serde(default)]
    pub geolocation: Option<Geolocation>,
}

/// Scalar text fields merged independently during conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CustomerField {
    BusinessName,
    ContactPerson,
    Phone,
    Email,
    Address,
}

impl CustomerField {
    pub const ALL: [Self; 5] = [
        Self::BusinessName,
        Self::ContactPerson,
        Self::Phone,
        Self::Email,
        Self::Address,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BusinessName => "business_name",
            Self::ContactPerson => "contact_person",
            Self::Phone => "phone",
            Self::Email => "email",
            Self::Address => "address",
        }
    }
}

impl Customer {
    pub fn new(
        business_name: impl Into<String>,
        contact_person: impl Into<String>,
        phone: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            business_name: business_name.into(),
            contact_person: contact_person.into(),
            phone: phone.into(),
            address: address.into(),
            ..Self::default()
        }
    }

    /// Text value of a scalar field (`None` only for a missing email).
    pub fn field(&self, field: CustomerField) -> Option<&str> {
        match field {
            CustomerField::BusinessName => Some(&self.business_name),
            CustomerField::ContactPerson => Some(&self.contact_person),
            CustomerField::Phone => Some(&self.phone),
            CustomerField::Email => self.email.as_deref(),
            CustomerField::Address => Some(&self.address),
        }
    }

    pub fn set_field(&mut self, field: CustomerField, value: Option<&str>) {
        let text = value.unwrap_or_default().to_string();
        match field {
            CustomerField::BusinessName => self.business_name = text,
            CustomerField::ContactPerson => self.contact_person = text,
            CustomerField::Phone => self.phone = text,
            CustomerField::Email => self.email = value.map(ToString::to_string),
            CustomerField::Address => self.address = text,
        }
    }

    /// Trim text fields and drop a blank email.
    pub fn normalize(&mut self) {
        self.business_name = self.business_name.trim().to_string();
        self.contact_person = self.contact_person.trim().to_string();
        self.phone = self.phone.trim().to_string();
        self.address = self.address.trim().to_string();
        self.email = crate::util::normalize_text_option(self.email.take());
    }

    /// Check the fields a saved customer must carry.
    pub fn validate(&self) -> Result<(), String> {
        if self.business_name.trim().is_empty() {
            return Err("business name is required".to_string());
        }
        if self.contact_person.trim().is_empty() {
            return Err("contact person is required".to_string());
        }
        if self.phone.trim().is_empty() {
            return Err("phone number is required".to_string());
        }
        if self.address.trim().is_empty() {
            return Err("address is required".to_string());
        }
        if let Some(email) = &self.email {
            if !email.contains('@') {
                return Err(format!("email '{email}' is not a valid address"));
            }
        }
        if let Some(geolocation) = &self.geolocation {
            geolocation.validate()?;
        }
        Ok(())
    }
}
