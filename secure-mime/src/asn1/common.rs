// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Time primitives shared by the X.509 and CMS structures.

RFC 5280 and RFC 5652 both use the `Time` CHOICE of UTCTime and
GeneralizedTime. A single implementation lives here so certificates,
CRLs and signed attributes all agree on parsing and emission.
*/

use {
    bcder::{
        decode::{Constructed, Malformed, Primitive, Source},
        encode::{PrimitiveContent, Values},
        Mode, Tag,
    },
    chrono::{Datelike, TimeZone, Timelike},
    std::{io::Write, ops::Deref, str::FromStr},
};

/// Time variant.
///
/// ```ASN.1
/// Time ::= CHOICE {
///   utcTime UTCTime,
///   generalTime GeneralizedTime }
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Time {
    UtcTime(UtcTime),
    GeneralTime(GeneralizedTime),
}

impl Time {
    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        cons.take_primitive(|tag, prim| match tag {
            Tag::UTC_TIME => Ok(Self::UtcTime(UtcTime::from_primitive(prim)?)),
            Tag::GENERALIZED_TIME => Ok(Self::GeneralTime(GeneralizedTime::from_primitive(prim)?)),
            _ => Err(Malformed.into()),
        })
    }

    pub fn take_opt_from<S: Source>(cons: &mut Constructed<S>) -> Result<Option<Self>, S::Err> {
        if let Some(utc) =
            cons.take_opt_primitive_if(Tag::UTC_TIME, |prim| UtcTime::from_primitive(prim))?
        {
            Ok(Some(Self::UtcTime(utc)))
        } else if let Some(general) = cons
            .take_opt_primitive_if(Tag::GENERALIZED_TIME, |prim| {
                GeneralizedTime::from_primitive(prim)
            })?
        {
            Ok(Some(Self::GeneralTime(general)))
        } else {
            Ok(None)
        }
    }

    pub fn encode_ref(&self) -> impl Values + '_ {
        match self {
            Self::UtcTime(utc) => (Some(utc.encode()), None),
            Self::GeneralTime(gt) => (None, Some(gt.encode())),
        }
    }
}

impl AsRef<chrono::DateTime<chrono::Utc>> for Time {
    fn as_ref(&self) -> &chrono::DateTime<chrono::Utc> {
        match self {
            Self::UtcTime(dt) => dt.deref(),
            Self::GeneralTime(dt) => dt.deref(),
        }
    }
}

impl From<chrono::DateTime<chrono::Utc>> for Time {
    fn from(t: chrono::DateTime<chrono::Utc>) -> Self {
        Self::UtcTime(UtcTime(t))
    }
}

impl From<Time> for chrono::DateTime<chrono::Utc> {
    fn from(t: Time) -> Self {
        match t {
            Time::UtcTime(utc) => *utc,
            Time::GeneralTime(gt) => *gt,
        }
    }
}

fn parse_digits<S: Source, T: FromStr>(data: &[u8]) -> Result<T, S::Err> {
    T::from_str(std::str::from_utf8(data).map_err(|_| Malformed)?).map_err(|_| Malformed.into())
}

fn assemble<S: Source>(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
) -> Result<chrono::DateTime<chrono::Utc>, S::Err> {
    if let chrono::LocalResult::Single(dt) = chrono::Utc.ymd_opt(year, month, day) {
        if let Some(dt) = dt.and_hms_opt(hour, minute, second) {
            return Ok(dt);
        }
    }

    Err(Malformed.into())
}

/// GeneralizedTime, restricted to the `YYYYMMDDHHMMSSZ` form DER requires.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GeneralizedTime(chrono::DateTime<chrono::Utc>);

impl Deref for GeneralizedTime {
    type Target = chrono::DateTime<chrono::Utc>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl GeneralizedTime {
    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        cons.take_primitive_if(Tag::GENERALIZED_TIME, |prim| Self::from_primitive(prim))
    }

    pub fn from_primitive<S: Source>(prim: &mut Primitive<S>) -> Result<Self, S::Err> {
        let data = prim.take_all()?;

        if data.len() != "YYYYMMDDHHMMSSZ".len() || data[14] != b'Z' {
            return Err(Malformed.into());
        }

        let year = parse_digits::<S, i32>(&data[0..4])?;
        let month = parse_digits::<S, u32>(&data[4..6])?;
        let day = parse_digits::<S, u32>(&data[6..8])?;
        let hour = parse_digits::<S, u32>(&data[8..10])?;
        let minute = parse_digits::<S, u32>(&data[10..12])?;
        let second = parse_digits::<S, u32>(&data[12..14])?;

        Ok(Self(assemble::<S>(year, month, day, hour, minute, second)?))
    }
}

impl ToString for GeneralizedTime {
    fn to_string(&self) -> String {
        format!(
            "{:04}{:02}{:02}{:02}{:02}{:02}Z",
            self.0.year(),
            self.0.month(),
            self.0.day(),
            self.0.hour(),
            self.0.minute(),
            self.0.second()
        )
    }
}

impl PrimitiveContent for GeneralizedTime {
    const TAG: Tag = Tag::GENERALIZED_TIME;

    fn encoded_len(&self, _: Mode) -> usize {
        self.to_string().len()
    }

    fn write_encoded<W: Write>(&self, _: Mode, target: &mut W) -> Result<(), std::io::Error> {
        target.write_all(self.to_string().as_bytes())
    }
}

/// UTCTime with the RFC 5280 two-digit year pivot (>= 50 means 19xx).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UtcTime(chrono::DateTime<chrono::Utc>);

impl UtcTime {
    /// Obtain a new instance with now as the time.
    pub fn now() -> Self {
        Self(chrono::Utc::now())
    }

    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        cons.take_primitive_if(Tag::UTC_TIME, |prim| Self::from_primitive(prim))
    }

    pub fn from_primitive<S: Source>(prim: &mut Primitive<S>) -> Result<Self, S::Err> {
        let data = prim.take_all()?;

        if data.len() != "YYMMDDHHMMSSZ".len() || data[12] != b'Z' {
            return Err(Malformed.into());
        }

        let year = parse_digits::<S, i32>(&data[0..2])?;
        let year = if year >= 50 { year + 1900 } else { year + 2000 };

        let month = parse_digits::<S, u32>(&data[2..4])?;
        let day = parse_digits::<S, u32>(&data[4..6])?;
        let hour = parse_digits::<S, u32>(&data[6..8])?;
        let minute = parse_digits::<S, u32>(&data[8..10])?;
        let second = parse_digits::<S, u32>(&data[10..12])?;

        Ok(Self(assemble::<S>(year, month, day, hour, minute, second)?))
    }
}

impl From<chrono::DateTime<chrono::Utc>> for UtcTime {
    fn from(t: chrono::DateTime<chrono::Utc>) -> Self {
        Self(t)
    }
}

impl ToString for UtcTime {
    fn to_string(&self) -> String {
        format!(
            "{:02}{:02}{:02}{:02}{:02}{:02}Z",
            self.0.year() % 100,
            self.0.month(),
            self.0.day(),
            self.0.hour(),
            self.0.minute(),
            self.0.second()
        )
    }
}

impl Deref for UtcTime {
    type Target = chrono::DateTime<chrono::Utc>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl PrimitiveContent for UtcTime {
    const TAG: Tag = Tag::UTC_TIME;

    fn encoded_len(&self, _: Mode) -> usize {
        self.to_string().len()
    }

    fn write_encoded<W: Write>(&self, _: Mode, target: &mut W) -> Result<(), std::io::Error> {
        target.write_all(self.to_string().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, bcder::Mode};

    fn decode_time(data: &[u8]) -> Result<Time, bcder::decode::Error> {
        bcder::decode::Constructed::decode(data, Mode::Der, |cons| Time::take_from(cons))
    }

    #[test]
    fn utc_time_round_trip() {
        let time = decode_time(b"\x17\x0d210301120000Z").unwrap();

        let dt: chrono::DateTime<chrono::Utc> = time.clone().into();
        assert_eq!(dt.year(), 2021);
        assert_eq!(dt.month(), 3);
        assert_eq!(dt.second(), 0);

        let mut encoded = Vec::new();
        time.encode_ref()
            .write_encoded(Mode::Der, &mut encoded)
            .unwrap();
        assert_eq!(encoded, b"\x17\x0d210301120000Z");
    }

    #[test]
    fn utc_time_year_pivot() {
        let time = decode_time(b"\x17\x0d990301120000Z").unwrap();
        let dt: chrono::DateTime<chrono::Utc> = time.into();
        assert_eq!(dt.year(), 1999);
    }

    #[test]
    fn generalized_time_parse() {
        let time = decode_time(b"\x18\x0f20380119031407Z").unwrap();
        let dt: chrono::DateTime<chrono::Utc> = time.into();
        assert_eq!(dt.year(), 2038);
    }

    #[test]
    fn malformed_time_rejected() {
        assert!(decode_time(b"\x17\x0d21030112000Zx").is_err());
        assert!(decode_time(b"\x17\x0dxx0301120000Z").is_err());
    }
}
