//! Transaction codec.
//!
//! Parses and serializes transactions in the legacy raw format and in the
//! Extended Format (EF), where every input also carries the satoshis and
//! locking script of the output it spends. The transaction ID is always the
//! double SHA-256 of the *raw* serialization, displayed byte-reversed.

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Marker written after the version field of an EF transaction.
const EF_MARKER: [u8; 6] = [0x00, 0x00, 0x00, 0x00, 0x00, 0xEF];

/// Ordinal inscription envelope prefix: `OP_FALSE OP_IF PUSH3 "ord"`.
const ORD_ENVELOPE: [u8; 6] = [0x00, 0x63, 0x03, b'o', b'r', b'd'];

/// Content type that identifies a BSV-21 token inscription.
const BSV21_CONTENT_TYPE: &[u8] = b"application/bsv-20";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub satoshis: u64,
    pub locking_script: Vec<u8>,
}

impl TxOutput {
    pub fn locking_script_hex(&self) -> String {
        hex::encode(&self.locking_script)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    /// Source transaction ID in display (big-endian) hex.
    pub source_txid: String,
    pub source_vout: u32,
    pub unlocking_script: Vec<u8>,
    pub sequence: u32,
    /// Output being spent; present when parsed from EF or filled in by a converter.
    pub source_output: Option<TxOutput>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tx {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
}

impl Tx {
    /// Decode a hex transaction, accepting both raw and EF encodings.
    pub fn from_hex(tx_hex: &str) -> Result<Self> {
        let bytes = hex::decode(tx_hex.trim()).map_err(|e| Error::InvalidHex(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        let version = r.u32_le()?;
        let extended = r.remaining() >= EF_MARKER.len() && r.peek(EF_MARKER.len())? == EF_MARKER;
        if extended {
            r.skip(EF_MARKER.len())?;
        }

        let input_count = r.varint()?;
        let mut inputs = Vec::with_capacity(bounded_capacity(input_count));
        for _ in 0..input_count {
            let mut txid = r.take(32)?.to_vec();
            txid.reverse();
            let source_vout = r.u32_le()?;
            let script_len = r.varint()?;
            let unlocking_script = r.take(to_len(script_len)?)?.to_vec();
            let sequence = r.u32_le()?;
            let source_output = if extended {
                let satoshis = r.u64_le()?;
                let len = r.varint()?;
                let locking_script = r.take(to_len(len)?)?.to_vec();
                Some(TxOutput {
                    satoshis,
                    locking_script,
                })
            } else {
                None
            };
            inputs.push(TxInput {
                source_txid: hex::encode(txid),
                source_vout,
                unlocking_script,
                sequence,
                source_output,
            });
        }

        let output_count = r.varint()?;
        let mut outputs = Vec::with_capacity(bounded_capacity(output_count));
        for _ in 0..output_count {
            let satoshis = r.u64_le()?;
            let len = r.varint()?;
            let locking_script = r.take(to_len(len)?)?.to_vec();
            outputs.push(TxOutput {
                satoshis,
                locking_script,
            });
        }

        let lock_time = r.u32_le()?;
        if r.remaining() != 0 {
            return Err(Error::TxDecode(format!(
                "{} trailing bytes after lock time",
                r.remaining()
            )));
        }

        Ok(Tx {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }

    /// `true` when every input carries its source output.
    pub fn is_extended(&self) -> bool {
        !self.inputs.is_empty() && self.inputs.iter().all(|i| i.source_output.is_some())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.serialize(false)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// EF serialization. Fails if any input lacks its source output.
    pub fn to_ef_bytes(&self) -> Result<Vec<u8>> {
        if let Some(pos) = self.inputs.iter().position(|i| i.source_output.is_none()) {
            return Err(Error::TxDecode(format!(
                "input {pos} has no source output, cannot encode as EF"
            )));
        }
        Ok(self.serialize(true))
    }

    pub fn to_ef_hex(&self) -> Result<String> {
        self.to_ef_bytes().map(hex::encode)
    }

    pub fn txid(&self) -> String {
        let first = Sha256::digest(self.to_bytes());
        let mut hash = Sha256::digest(first).to_vec();
        hash.reverse();
        hex::encode(hash)
    }

    pub fn total_output_satoshis(&self) -> u64 {
        self.outputs.iter().map(|o| o.satoshis).sum()
    }

    /// `true` when the first input spends an output carrying a BSV-21 token
    /// inscription envelope. Transactions without source outputs are never
    /// treated as token transfers.
    pub fn is_token_transfer(&self) -> bool {
        let Some(first) = self.inputs.first() else {
            return false;
        };
        let Some(source) = first.source_output.as_ref() else {
            return false;
        };
        has_token_envelope(&source.locking_script)
    }

    fn serialize(&self, extended: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(10 + self.inputs.len() * 180 + self.outputs.len() * 40);
        out.extend_from_slice(&self.version.to_le_bytes());
        if extended {
            out.extend_from_slice(&EF_MARKER);
        }
        write_varint(&mut out, self.inputs.len() as u64);
        for input in &self.inputs {
            // display hex was validated on parse; builders go through `decode_txid`
            let mut txid = hex::decode(&input.source_txid).unwrap_or_else(|_| vec![0u8; 32]);
            txid.reverse();
            out.extend_from_slice(&txid);
            out.extend_from_slice(&input.source_vout.to_le_bytes());
            write_varint(&mut out, input.unlocking_script.len() as u64);
            out.extend_from_slice(&input.unlocking_script);
            out.extend_from_slice(&input.sequence.to_le_bytes());
            if extended {
                if let Some(source) = &input.source_output {
                    out.extend_from_slice(&source.satoshis.to_le_bytes());
                    write_varint(&mut out, source.locking_script.len() as u64);
                    out.extend_from_slice(&source.locking_script);
                }
            }
        }
        write_varint(&mut out, self.outputs.len() as u64);
        for output in &self.outputs {
            out.extend_from_slice(&output.satoshis.to_le_bytes());
            write_varint(&mut out, output.locking_script.len() as u64);
            out.extend_from_slice(&output.locking_script);
        }
        out.extend_from_slice(&self.lock_time.to_le_bytes());
        out
    }
}

/// Validate a display-order transaction ID (64 hex chars).
pub fn decode_txid(txid: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(txid).map_err(|e| Error::InvalidHex(format!("txid {txid}: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| Error::InvalidHex(format!("txid {txid}: expected 32 bytes")))
}

/// Double SHA-256.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

/// Hex SHA-256 of a string; used for xpub IDs and lock keys.
pub fn hash_hex(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

pub fn has_token_envelope(script: &[u8]) -> bool {
    contains(script, &ORD_ENVELOPE) && contains(script, BSV21_CONTENT_TYPE)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

pub(crate) fn write_varint(out: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => out.push(n as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&n.to_le_bytes());
        }
    }
}

fn to_len(n: u64) -> Result<usize> {
    usize::try_from(n).map_err(|_| Error::TxDecode(format!("length {n} out of range")))
}

// Counts come from untrusted input; never pre-allocate more than a page of entries.
fn bounded_capacity(n: u64) -> usize {
    n.min(1024) as usize
}

/// Byte cursor shared by the transaction and merkle path decoders.
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub(crate) fn peek(&self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::TxDecode(format!(
                "unexpected end of data at offset {}",
                self.pos
            )));
        }
        Ok(&self.data[self.pos..self.pos + n])
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let slice = self.peek(n)?;
        self.pos += n;
        Ok(slice)
    }

    pub(crate) fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u32_le(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    pub(crate) fn u64_le(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    pub(crate) fn varint(&mut self) -> Result<u64> {
        match self.u8()? {
            0xfd => {
                let mut buf = [0u8; 2];
                buf.copy_from_slice(self.take(2)?);
                Ok(u16::from_le_bytes(buf) as u64)
            }
            0xfe => self.u32_le().map(u64::from),
            0xff => self.u64_le(),
            n => Ok(n as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p2pkh(tag: u8) -> Vec<u8> {
        let mut s = vec![0x76, 0xa9, 0x14];
        s.extend_from_slice(&[tag; 20]);
        s.extend_from_slice(&[0x88, 0xac]);
        s
    }

    fn sample_tx(with_sources: bool) -> Tx {
        Tx {
            version: 1,
            inputs: vec![TxInput {
                source_txid: "aa".repeat(31) + "01",
                source_vout: 2,
                unlocking_script: vec![0x51],
                sequence: 0xffff_ffff,
                source_output: with_sources.then(|| TxOutput {
                    satoshis: 5_000,
                    locking_script: p2pkh(0x11),
                }),
            }],
            outputs: vec![
                TxOutput {
                    satoshis: 3_000,
                    locking_script: p2pkh(0x22),
                },
                TxOutput {
                    satoshis: 1_999,
                    locking_script: p2pkh(0x33),
                },
            ],
            lock_time: 0,
        }
    }

    #[test]
    fn raw_hex_decodes_to_same_transaction() {
        let tx = sample_tx(false);
        let decoded = Tx::from_hex(&tx.to_hex()).unwrap();
        assert_eq!(decoded, tx);
        assert!(!decoded.is_extended());
    }

    #[test]
    fn ef_keeps_source_outputs_and_txid() {
        let tx = sample_tx(true);
        let ef_hex = tx.to_ef_hex().unwrap();
        assert_eq!(&ef_hex[8..20], "0000000000ef");

        let decoded = Tx::from_hex(&ef_hex).unwrap();
        assert!(decoded.is_extended());
        assert_eq!(decoded.inputs[0].source_output.as_ref().unwrap().satoshis, 5_000);
        // EF data does not change the identity of the transaction
        assert_eq!(decoded.txid(), sample_tx(false).txid());
    }

    #[test]
    fn ef_requires_all_sources() {
        assert!(sample_tx(false).to_ef_hex().is_err());
    }

    #[test]
    fn txid_is_reversed_double_sha256() {
        let tx = sample_tx(false);
        let mut expected = sha256d(&tx.to_bytes()).to_vec();
        expected.reverse();
        assert_eq!(tx.txid(), hex::encode(expected));
        assert_eq!(tx.txid().len(), 64);
    }

    #[test]
    fn truncated_and_trailing_data_rejected() {
        let hex = sample_tx(false).to_hex();
        assert!(Tx::from_hex(&hex[..hex.len() - 4]).is_err());
        assert!(Tx::from_hex(&format!("{hex}00")).is_err());
        assert!(matches!(Tx::from_hex("zz"), Err(Error::InvalidHex(_))));
    }

    #[test]
    fn varint_boundaries() {
        for n in [0u64, 0xfc, 0xfd, 0xffff, 0x1_0000, 0xffff_ffff, 0x1_0000_0000] {
            let mut buf = Vec::new();
            write_varint(&mut buf, n);
            assert_eq!(Reader::new(&buf).varint().unwrap(), n);
        }
    }

    #[test]
    fn token_envelope_detected_on_first_input_only() {
        let mut inscription = ORD_ENVELOPE.to_vec();
        inscription.push(0x51);
        inscription.push(BSV21_CONTENT_TYPE.len() as u8);
        inscription.extend_from_slice(BSV21_CONTENT_TYPE);
        inscription.extend_from_slice(&[0x00, 0x68]);
        inscription.extend_from_slice(&p2pkh(0x44));

        let mut tx = sample_tx(true);
        assert!(!tx.is_token_transfer());
        tx.inputs[0].source_output.as_mut().unwrap().locking_script = inscription;
        assert!(tx.is_token_transfer());

        tx.inputs[0].source_output = None;
        assert!(!tx.is_token_transfer());
    }
}
