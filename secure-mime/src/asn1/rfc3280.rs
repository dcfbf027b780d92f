// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! X.501/RFC 3280 name structures.

Distinguished names are stored as parsed ASN.1 because round-tripping
them through any friendlier representation loses the original encoding,
and issuer/subject comparisons must happen on the wire form.
*/

use {
    bcder::{
        decode::{Constructed, Malformed, Source},
        encode,
        encode::{PrimitiveContent, Values},
        string::{Ia5String, PrintableString, Utf8String},
        Captured, ConstOid, Mode, OctetString, Oid, Tag,
    },
    bytes::Bytes,
    std::{
        io::Write,
        ops::{Deref, DerefMut},
        str::FromStr,
    },
};

/// Common Name (CN) attribute.
///
/// 2.5.4.3
pub const OID_COMMON_NAME: ConstOid = Oid(&[85, 4, 3]);

/// Country Name (C) attribute.
///
/// 2.5.4.6
pub const OID_COUNTRY_NAME: ConstOid = Oid(&[85, 4, 6]);

/// Organization Name (O) attribute.
///
/// 2.5.4.10
pub const OID_ORGANIZATION_NAME: ConstOid = Oid(&[85, 4, 10]);

/// PKCS #9 emailAddress attribute.
///
/// 1.2.840.113549.1.9.1
pub const OID_EMAIL_ADDRESS: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 9, 1]);

pub type GeneralNames = Vec<GeneralName>;

/// General name.
///
/// ```ASN.1
/// GeneralName ::= CHOICE {
///   otherName                       [0]     AnotherName,
///   rfc822Name                      [1]     IA5String,
///   dNSName                         [2]     IA5String,
///   x400Address                     [3]     ORAddress,
///   directoryName                   [4]     Name,
///   ediPartyName                    [5]     EDIPartyName,
///   uniformResourceIdentifier       [6]     IA5String,
///   iPAddress                       [7]     OCTET STRING,
///   registeredID                    [8]     OBJECT IDENTIFIER }
/// ```
///
/// Only the variants that occur in subject alternative names of mail
/// certificates are modeled individually; everything else is captured
/// raw so unfamiliar names survive a decode without aborting it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum GeneralName {
    Rfc822Name(String),
    DnsName(String),
    UniformResourceIdentifier(String),
    IpAddress(OctetString),
    DirectoryName(Name),
    Other(Tag),
}

impl GeneralName {
    pub fn take_opt_from<S: Source>(cons: &mut Constructed<S>) -> Result<Option<Self>, S::Err> {
        if let Some(data) = cons.take_opt_primitive_if(Tag::CTX_1, |prim| prim.take_all())? {
            Ok(Some(Self::Rfc822Name(ia5_to_string::<S>(&data)?)))
        } else if let Some(data) = cons.take_opt_primitive_if(Tag::CTX_2, |prim| prim.take_all())? {
            Ok(Some(Self::DnsName(ia5_to_string::<S>(&data)?)))
        } else if let Some(data) = cons.take_opt_primitive_if(Tag::CTX_6, |prim| prim.take_all())? {
            Ok(Some(Self::UniformResourceIdentifier(ia5_to_string::<S>(
                &data,
            )?)))
        } else if let Some(data) = cons.take_opt_primitive_if(Tag::ctx(7), |prim| prim.take_all())?
        {
            Ok(Some(Self::IpAddress(OctetString::new(data))))
        } else if cons
            .take_opt_primitive_if(Tag::ctx(8), |prim| prim.take_all())?
            .is_some()
        {
            Ok(Some(Self::Other(Tag::ctx(8))))
        } else if let Some(name) =
            cons.take_opt_constructed_if(Tag::CTX_4, |cons| Name::take_from(cons))?
        {
            Ok(Some(Self::DirectoryName(name)))
        } else {
            // otherName [0], x400Address [3] and ediPartyName [5] carry
            // structure nothing in mail handling consumes; swallow them
            // so a SAN mentioning one still parses.
            for tag in [Tag::CTX_0, Tag::CTX_3, Tag::CTX_5] {
                if cons
                    .take_opt_constructed_if(tag, |cons| {
                        cons.capture_all()?;
                        Ok(())
                    })?
                    .is_some()
                {
                    return Ok(Some(Self::Other(tag)));
                }
            }

            Ok(None)
        }
    }

    pub fn encode_ref(&self) -> impl Values + '_ {
        match self {
            Self::Rfc822Name(name) => (Some(name.as_bytes().encode_as(Tag::CTX_1)), None, None),
            Self::DnsName(name) => (Some(name.as_bytes().encode_as(Tag::CTX_2)), None, None),
            Self::UniformResourceIdentifier(name) => {
                (Some(name.as_bytes().encode_as(Tag::CTX_6)), None, None)
            }
            Self::IpAddress(data) => (None, Some(data.encode_ref_as(Tag::ctx(7))), None),
            Self::DirectoryName(name) => (None, None, Some(name.encode_ref_as(Tag::CTX_4))),
            Self::Other(_) => unimplemented!("opaque general names cannot be re-encoded"),
        }
    }
}

impl Values for GeneralName {
    fn encoded_len(&self, mode: Mode) -> usize {
        self.encode_ref().encoded_len(mode)
    }

    fn write_encoded<W: Write>(&self, mode: Mode, target: &mut W) -> Result<(), std::io::Error> {
        self.encode_ref().write_encoded(mode, target)
    }
}

fn ia5_to_string<S: Source>(data: &[u8]) -> Result<String, S::Err> {
    String::from_utf8(data.to_vec()).map_err(|_| Malformed.into())
}

/// Parse a GeneralNames SEQUENCE, as found in subjectAltName extensions.
pub fn take_general_names_from<S: Source>(
    cons: &mut Constructed<S>,
) -> Result<GeneralNames, S::Err> {
    cons.take_sequence(|cons| {
        let mut names = Vec::new();

        while let Some(name) = GeneralName::take_opt_from(cons)? {
            names.push(name);
        }

        Ok(names)
    })
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Name {
    RdnSequence(RdnSequence),
}

impl Name {
    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        Ok(Self::RdnSequence(RdnSequence::take_from(cons)?))
    }

    pub fn encode_ref(&self) -> impl Values + '_ {
        match self {
            Self::RdnSequence(seq) => seq.encode_ref(),
        }
    }

    pub fn encode_ref_as(&self, tag: Tag) -> impl Values + '_ {
        match self {
            Self::RdnSequence(seq) => seq.encode_ref_as(tag),
        }
    }

    /// Iterate over all attributes in this Name.
    pub fn iter_attributes(&self) -> impl Iterator<Item = &AttributeTypeAndValue> {
        match self {
            Self::RdnSequence(seq) => seq.iter().flat_map(|rdn| rdn.iter()),
        }
    }

    /// Iterate over all attributes having a given type OID.
    pub fn iter_by_oid(&self, oid: Oid) -> impl Iterator<Item = &AttributeTypeAndValue> {
        self.iter_attributes().filter(move |atv| atv.typ == oid)
    }

    /// Find the first string value of an attribute with the given type OID.
    pub fn find_attribute_string(&self, oid: &Oid<&'static [u8]>) -> Option<String> {
        let oid = Oid(Bytes::copy_from_slice(oid.as_ref()));

        self.iter_by_oid(oid).find_map(|atv| atv.to_string().ok())
    }

    /// Appends a Utf8String attribute in a new RDN.
    pub fn append_utf8_string(
        &mut self,
        oid: Oid,
        value: &str,
    ) -> Result<(), bcder::string::CharSetError> {
        let mut rdn = RelativeDistinguishedName::default();
        rdn.push(AttributeTypeAndValue::new_utf8_string(oid, value)?);

        match self {
            Self::RdnSequence(seq) => seq.push(rdn),
        }

        Ok(())
    }

    /// Appends a PrintableString attribute in a new RDN.
    pub fn append_printable_string(
        &mut self,
        oid: Oid,
        value: &str,
    ) -> Result<(), bcder::string::CharSetError> {
        let mut rdn = RelativeDistinguishedName::default();
        rdn.push(AttributeTypeAndValue::new_printable_string(oid, value)?);

        match self {
            Self::RdnSequence(seq) => seq.push(rdn),
        }

        Ok(())
    }
}

impl Default for Name {
    fn default() -> Self {
        Self::RdnSequence(RdnSequence::default())
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RdnSequence(Vec<RelativeDistinguishedName>);

impl Deref for RdnSequence {
    type Target = Vec<RelativeDistinguishedName>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for RdnSequence {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl RdnSequence {
    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        cons.take_sequence(|cons| {
            let mut values = Vec::new();

            while let Some(value) = RelativeDistinguishedName::take_opt_from(cons)? {
                values.push(value);
            }

            Ok(Self(values))
        })
    }

    pub fn encode_ref(&self) -> impl Values + '_ {
        encode::sequence(&self.0)
    }

    pub fn encode_ref_as(&self, tag: Tag) -> impl Values + '_ {
        encode::sequence_as(tag, &self.0)
    }
}

pub type DistinguishedName = RdnSequence;

/// Relative distinguished name.
///
/// ```ASN.1
/// RelativeDistinguishedName ::=
///   SET OF AttributeTypeAndValue
/// ```
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RelativeDistinguishedName(Vec<AttributeTypeAndValue>);

impl Deref for RelativeDistinguishedName {
    type Target = Vec<AttributeTypeAndValue>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for RelativeDistinguishedName {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl RelativeDistinguishedName {
    pub fn take_opt_from<S: Source>(cons: &mut Constructed<S>) -> Result<Option<Self>, S::Err> {
        cons.take_opt_set(|cons| {
            let mut values = Vec::new();

            while let Some(value) = AttributeTypeAndValue::take_opt_from(cons)? {
                values.push(value);
            }

            Ok(Self(values))
        })
    }

    pub fn encode_ref(&self) -> impl Values + '_ {
        encode::set(&self.0)
    }
}

impl Values for RelativeDistinguishedName {
    fn encoded_len(&self, mode: Mode) -> usize {
        self.encode_ref().encoded_len(mode)
    }

    fn write_encoded<W: Write>(&self, mode: Mode, target: &mut W) -> Result<(), std::io::Error> {
        self.encode_ref().write_encoded(mode, target)
    }
}

/// Attribute type and its value.
///
/// ```ASN.1
/// AttributeTypeAndValue ::= SEQUENCE {
///   type     AttributeType,
///   value    AttributeValue }
/// ```
#[derive(Clone, Debug)]
pub struct AttributeTypeAndValue {
    pub typ: AttributeType,
    pub value: AttributeValue,
}

impl AttributeTypeAndValue {
    pub fn take_opt_from<S: Source>(cons: &mut Constructed<S>) -> Result<Option<Self>, S::Err> {
        cons.take_opt_sequence(|cons| {
            let typ = AttributeType::take_from(cons)?;
            let value = cons.capture_all()?;

            Ok(Self { typ, value })
        })
    }

    pub fn encode_ref(&self) -> impl Values + '_ {
        encode::sequence((self.typ.encode_ref(), &self.value))
    }

    /// Attempt to coerce the stored value to a Rust string.
    ///
    /// Directory strings come in several ASN.1 string flavors. The common
    /// ones are tried in turn; anything else is a decode error.
    pub fn to_string(&self) -> Result<String, bcder::decode::Error> {
        Constructed::decode(self.value.as_slice(), Mode::Ber, |cons| {
            cons.take_value(|tag, content| {
                if tag == Tag::PRINTABLE_STRING {
                    Ok(PrintableString::from_content(content)?.to_string())
                } else if tag == Tag::UTF8_STRING {
                    Ok(Utf8String::from_content(content)?.to_string())
                } else if tag == Tag::IA5_STRING {
                    Ok(Ia5String::from_content(content)?.to_string())
                } else {
                    Err(Malformed.into())
                }
            })
        })
    }

    /// Construct a new instance holding a PrintableString.
    pub fn new_printable_string(oid: Oid, s: &str) -> Result<Self, bcder::string::CharSetError> {
        let ps = PrintableString::from_str(s)?;

        Ok(Self {
            typ: oid,
            value: Captured::from_values(Mode::Der, ps.encode()),
        })
    }

    /// Construct a new instance holding a Utf8String.
    pub fn new_utf8_string(oid: Oid, s: &str) -> Result<Self, bcder::string::CharSetError> {
        let us = Utf8String::from_str(s)?;

        Ok(Self {
            typ: oid,
            value: Captured::from_values(Mode::Der, us.encode()),
        })
    }

    /// Construct a new instance holding an IA5String.
    pub fn new_ia5_string(oid: Oid, s: &str) -> Result<Self, bcder::string::CharSetError> {
        let is = Ia5String::from_str(s)?;

        Ok(Self {
            typ: oid,
            value: Captured::from_values(Mode::Der, is.encode()),
        })
    }
}

impl PartialEq for AttributeTypeAndValue {
    fn eq(&self, other: &Self) -> bool {
        self.typ == other.typ && self.value.as_slice() == other.value.as_slice()
    }
}

impl Eq for AttributeTypeAndValue {}

impl Values for AttributeTypeAndValue {
    fn encoded_len(&self, mode: Mode) -> usize {
        self.encode_ref().encoded_len(mode)
    }

    fn write_encoded<W: Write>(&self, mode: Mode, target: &mut W) -> Result<(), std::io::Error> {
        self.encode_ref().write_encoded(mode, target)
    }
}

pub type AttributeType = Oid;

pub type AttributeValue = Captured;

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_name() -> Name {
        let mut name = Name::default();
        name.append_utf8_string(Oid(OID_COMMON_NAME.as_ref().into()), "Alice")
            .unwrap();
        name.append_printable_string(Oid(OID_COUNTRY_NAME.as_ref().into()), "US")
            .unwrap();
        name
    }

    #[test]
    fn name_round_trip() {
        let name = simple_name();

        let mut encoded = Vec::new();
        name.encode_ref()
            .write_encoded(Mode::Der, &mut encoded)
            .unwrap();

        let decoded = bcder::decode::Constructed::decode(encoded.as_slice(), Mode::Der, |cons| {
            Name::take_from(cons)
        })
        .unwrap();

        assert_eq!(decoded, name);
        assert_eq!(
            decoded.find_attribute_string(&OID_COMMON_NAME),
            Some("Alice".to_string())
        );
        assert_eq!(
            decoded.find_attribute_string(&OID_COUNTRY_NAME),
            Some("US".to_string())
        );
    }

    #[test]
    fn general_names_round_trip() {
        let names = vec![
            GeneralName::Rfc822Name("alice@example.com".to_string()),
            GeneralName::DnsName("example.com".to_string()),
        ];

        let mut encoded = Vec::new();
        encode::sequence(&names)
            .write_encoded(Mode::Der, &mut encoded)
            .unwrap();

        let decoded = bcder::decode::Constructed::decode(encoded.as_slice(), Mode::Der, |cons| {
            take_general_names_from(cons)
        })
        .unwrap();

        assert_eq!(decoded, names);
    }
}
