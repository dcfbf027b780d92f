// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! ASN.1 primitives for the CMS and X.509 structures used by S/MIME.

Types in this module tree are low-level wire types used only for
(de)serialization. Higher-level functionality lives outside `asn1`.
*/

pub mod common;
pub mod rfc3274;
pub mod rfc3280;
pub mod rfc5280;
pub mod rfc5652;
