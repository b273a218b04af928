//! NTAG 424 DNA secure messaging.
//!
//! Host half of `AuthenticateEV2First` and `ChangeKey` (CommMode.Full).
//! Nothing here touches the bus: APDUs are built and checked as bytes and
//! the PN532 adapter carries them to the card with InDataExchange.
//!
//! ```text
//!  host                                         card
//!   90 71 00 00 02 KeyNo 00 00           ──▶
//!                                        ◀──   E(Kx, RndB)                   91 AF
//!   90 AF 00 00 20 E(Kx, RndA ‖ RndB') 00 ──▶
//!                                        ◀──   E(Kx, TI ‖ RndA' ‖ caps)      91 00
//! ```
//!
//! `X'` is `X` rotated left by one byte. Both session keys are CMACs of
//! a 32-byte vector mixing RndA and RndB under the application key.

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use cmac::{Cmac, Mac};

use crate::app::ports::{Key, NfcError};

pub type Block = [u8; 16];

/// Longest APDU we send (ChangeKey: header, Lc, 41 data bytes, Le).
pub type Apdu = heapless::Vec<u8, 48>;

const CLA_NATIVE: u8 = 0x90;
pub const INS_AUTH_EV2_FIRST: u8 = 0x71;
pub const INS_ADDITIONAL_FRAME: u8 = 0xAF;
pub const INS_CHANGE_KEY: u8 = 0xC4;

pub const SW_OK: [u8; 2] = [0x91, 0x00];
pub const SW_ADDITIONAL_FRAME: [u8; 2] = [0x91, 0xAF];

/// Version byte stored alongside every key we write.
pub const KEY_VERSION: u8 = 0x00;

const SV_ENC: [u8; 2] = [0xA5, 0x5A];
const SV_MAC: [u8; 2] = [0x5A, 0xA5];
const IV_COMMAND: [u8; 2] = [0xA5, 0x5A];
const ZERO_IV: Block = [0; 16];

/// ISO 7816 wrapping of a native command.
pub fn native_apdu(ins: u8, data: &[u8]) -> Apdu {
    let mut apdu = Apdu::new();
    let _ = apdu.extend_from_slice(&[CLA_NATIVE, ins, 0x00, 0x00]);
    if !data.is_empty() {
        let _ = apdu.push(data.len() as u8);
        let _ = apdu.extend_from_slice(data);
    }
    let _ = apdu.push(0x00);
    apdu
}

// ── Primitives ───────────────────────────────────────────────

fn aes(key: &Key) -> Aes128 {
    Aes128::new(GenericArray::from_slice(key))
}

/// AES-128-CBC over whole blocks, in place. No padding.
pub fn encrypt_cbc(key: &Key, iv: &Block, data: &mut [u8]) {
    let cipher = aes(key);
    let mut chain = *iv;
    for block in data.chunks_exact_mut(16) {
        for (b, c) in block.iter_mut().zip(chain) {
            *b ^= c;
        }
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
        chain.copy_from_slice(block);
    }
}

pub fn decrypt_cbc(key: &Key, iv: &Block, data: &mut [u8]) {
    let cipher = aes(key);
    let mut chain = *iv;
    for block in data.chunks_exact_mut(16) {
        let mut next = [0u8; 16];
        next.copy_from_slice(block);
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
        for (b, c) in block.iter_mut().zip(chain) {
            *b ^= c;
        }
        chain = next;
    }
}

pub fn cmac(key: &Key, parts: &[&[u8]]) -> Block {
    let mut mac = <Cmac<Aes128> as KeyInit>::new(GenericArray::from_slice(key));
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; 16];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// Odd-indexed bytes of a full CMAC.
pub fn truncate_mac(full: &Block) -> [u8; 8] {
    core::array::from_fn(|i| full[2 * i + 1])
}

pub fn rotate_left(block: &Block) -> Block {
    let mut out = *block;
    out.rotate_left(1);
    out
}

/// CRC-32 without the final inversion, as the card checks key data.
pub fn crc32_nk(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
        }
    }
    crc
}

/// Session vector: label ‖ 00 01 00 80 ‖ RndA[0..2] ‖ (RndA[2..8] ⊕ RndB[0..6])
/// ‖ RndB[6..16] ‖ RndA[8..16].
pub fn session_vector(label: [u8; 2], rnd_a: &Block, rnd_b: &Block) -> [u8; 32] {
    let mut sv = [0u8; 32];
    sv[..2].copy_from_slice(&label);
    sv[2..6].copy_from_slice(&[0x00, 0x01, 0x00, 0x80]);
    sv[6..8].copy_from_slice(&rnd_a[..2]);
    for i in 0..6 {
        sv[8 + i] = rnd_a[2 + i] ^ rnd_b[i];
    }
    sv[14..24].copy_from_slice(&rnd_b[6..]);
    sv[24..].copy_from_slice(&rnd_a[8..]);
    sv
}

// ── Authentication ───────────────────────────────────────────

/// Handshake state between the card's challenge and its final answer.
pub struct Ev2First {
    key: Key,
    key_no: u8,
    rnd_a: Block,
    rnd_b: Block,
}

impl Ev2First {
    /// First frame: key number and an empty capability field.
    pub fn begin(key_no: u8) -> Apdu {
        native_apdu(INS_AUTH_EV2_FIRST, &[key_no, 0x00])
    }

    /// Decrypt the card's `E(Kx, RndB)` and build `E(Kx, RndA ‖ RndB')`.
    pub fn respond(
        key: &Key,
        key_no: u8,
        rnd_a: Block,
        challenge: &[u8],
    ) -> Result<(Self, Apdu), NfcError> {
        let mut rnd_b: Block = challenge.try_into().map_err(|_| NfcError::AuthFailed)?;
        decrypt_cbc(key, &ZERO_IV, &mut rnd_b);

        let mut answer = [0u8; 32];
        answer[..16].copy_from_slice(&rnd_a);
        answer[16..].copy_from_slice(&rotate_left(&rnd_b));
        encrypt_cbc(key, &ZERO_IV, &mut answer);

        let state = Self {
            key: *key,
            key_no,
            rnd_a,
            rnd_b,
        };
        Ok((state, native_apdu(INS_ADDITIONAL_FRAME, &answer)))
    }

    /// Check that the card returned our RndA' and derive the session.
    pub fn finish(self, reply: &[u8]) -> Result<Session, NfcError> {
        let mut plain: [u8; 32] = reply.try_into().map_err(|_| NfcError::AuthFailed)?;
        decrypt_cbc(&self.key, &ZERO_IV, &mut plain);
        if plain[4..20] != rotate_left(&self.rnd_a) {
            return Err(NfcError::AuthFailed);
        }

        let mut ti = [0u8; 4];
        ti.copy_from_slice(&plain[..4]);
        Ok(Session {
            key_no: self.key_no,
            ti,
            cmd_ctr: 0,
            enc_key: cmac(&self.key, &[&session_vector(SV_ENC, &self.rnd_a, &self.rnd_b)]),
            mac_key: cmac(&self.key, &[&session_vector(SV_MAC, &self.rnd_a, &self.rnd_b)]),
        })
    }
}

/// An authenticated secure-messaging session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Key the session was opened with.
    pub key_no: u8,
    /// Transaction identifier chosen by the card.
    pub ti: [u8; 4],
    pub cmd_ctr: u16,
    pub(crate) enc_key: Key,
    pub(crate) mac_key: Key,
}

impl Session {
    fn command_iv(&self) -> Block {
        let mut iv = [0u8; 16];
        iv[..2].copy_from_slice(&IV_COMMAND);
        iv[2..6].copy_from_slice(&self.ti);
        iv[6..8].copy_from_slice(&self.cmd_ctr.to_le_bytes());
        aes(&self.enc_key).encrypt_block(GenericArray::from_mut_slice(&mut iv));
        iv
    }

    /// ChangeKey APDU: `KeyNo ‖ E(KSesEnc, key data) ‖ MACt`.
    ///
    /// Replacing the session's own key sends the new key in clear inside
    /// the cryptogram; any other slot sends `new ⊕ old` plus a CRC of the
    /// new key so the card can check it knew the old one.
    pub fn change_key(&self, key_no: u8, old_key: &Key, new_key: &Key) -> Apdu {
        let mut data = [0u8; 32];
        if key_no == self.key_no {
            data[..16].copy_from_slice(new_key);
            data[16] = KEY_VERSION;
            data[17] = 0x80;
        } else {
            for (d, (n, o)) in data[..16].iter_mut().zip(new_key.iter().zip(old_key)) {
                *d = n ^ o;
            }
            data[16] = KEY_VERSION;
            data[17..21].copy_from_slice(&crc32_nk(new_key).to_le_bytes());
            data[21] = 0x80;
        }
        encrypt_cbc(&self.enc_key, &self.command_iv(), &mut data);

        let mac = truncate_mac(&cmac(
            &self.mac_key,
            &[
                &[INS_CHANGE_KEY],
                &self.cmd_ctr.to_le_bytes(),
                &self.ti,
                &[key_no],
                &data,
            ],
        ));

        let mut body: heapless::Vec<u8, 41> = heapless::Vec::new();
        let _ = body.push(key_no);
        let _ = body.extend_from_slice(&data);
        let _ = body.extend_from_slice(&mac);
        native_apdu(INS_CHANGE_KEY, &body)
    }

    /// Advance the command counter after a successful command and check
    /// the card's response MAC (`00 ‖ CmdCtr ‖ TI`).
    pub fn accept_response(&mut self, mac: &[u8]) -> bool {
        self.cmd_ctr = self.cmd_ctr.wrapping_add(1);
        let expected = truncate_mac(&cmac(
            &self.mac_key,
            &[&[0x00], &self.cmd_ctr.to_le_bytes(), &self.ti],
        ));
        mac == expected.as_slice()
    }
}
