//! PN532 NFC front-end over I²C.
//!
//! Implements [`NfcReader`] on top of any `embedded_hal::i2c::I2c` bus, so
//! the same driver runs on `esp_idf_hal::i2c::I2cDriver` and on the
//! scripted bus in the tests below.
//!
//! ## Host link frames
//!
//! ```text
//!  host → PN532   00 00 FF  LEN LCS  D4 CMD DATA..  DCS 00
//!  PN532 → host   RDY  00 00 FF  LEN LCS  D5 CMD+1 DATA..  DCS 00
//!  ACK            RDY  00 00 FF 00 FF 00
//! ```
//!
//! `LEN` counts TFI + command + data, `LCS` makes `LEN + LCS == 0` and
//! `DCS` makes the byte sum of TFI..DATA plus `DCS` zero.  Every read on
//! I²C starts with the ready byte (bit 0 set when a frame is waiting).
//!
//! Card APDUs travel inside InDataExchange; the NTAG 424 handshake and
//! key change themselves live in [`super::ntag424`].

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{Error as _, I2c};
use log::{debug, error, info, warn};
use rand::RngCore;

use super::ntag424::{Ev2First, SW_ADDITIONAL_FRAME, SW_OK, Session};
use crate::app::ports::{CardUid, Key, NfcError, NfcReader};

/// 7-bit I²C address of the PN532.
pub const PN532_ADDR: u8 = 0x24;

const TFI_HOST: u8 = 0xD4;
const TFI_PN532: u8 = 0xD5;

const CMD_GET_FIRMWARE_VERSION: u8 = 0x02;
const CMD_SAM_CONFIGURATION: u8 = 0x14;
const CMD_RF_CONFIGURATION: u8 = 0x32;
const CMD_IN_DATA_EXCHANGE: u8 = 0x40;
const CMD_IN_LIST_PASSIVE_TARGET: u8 = 0x4A;

const ACK: [u8; 6] = [0x00, 0x00, 0xFF, 0x00, 0xFF, 0x00];

/// Longest frame exchanged with the reader (host link maximum).
const MAX_FRAME: usize = 64;

/// Ready-byte poll step while waiting for a frame.
const READY_POLL_MS: u32 = 5;
/// Budget for command replies other than target discovery.
const COMMAND_TIMEOUT_MS: u32 = 100;
/// Card round trips include the card's own AES work.
const EXCHANGE_TIMEOUT_MS: u32 = 300;
/// Re-activation of a card that is expected to be in the field.
const ACTIVATION_TIMEOUT_MS: u32 = 1000;

/// ISO 7816 SELECT of the NTAG 424 DNA application (DF name D2760000850101).
const SELECT_NTAG424_APP: [u8; 13] = [
    0x00, 0xA4, 0x04, 0x0C, 0x07, 0xD2, 0x76, 0x00, 0x00, 0x85, 0x01, 0x01, 0x00,
];
const SW_SELECTED: [u8; 2] = [0x90, 0x00];
/// SAK bit announcing ISO 14443-4 support.
const SAK_ISO14443_4: u8 = 0x20;

pub type FrameBuf = heapless::Vec<u8, MAX_FRAME>;

// ── Frame codec ──────────────────────────────────────────────

/// Build a host → PN532 information frame.
pub fn encode_command(cmd: u8, data: &[u8]) -> Result<FrameBuf, NfcError> {
    let len = 2 + data.len();
    if len + 7 > MAX_FRAME {
        return Err(NfcError::Bus);
    }
    let len = len as u8;
    let mut frame = FrameBuf::new();
    let mut sum = TFI_HOST.wrapping_add(cmd);
    for b in data {
        sum = sum.wrapping_add(*b);
    }
    let _ = frame.extend_from_slice(&[0x00, 0x00, 0xFF, len, len.wrapping_neg(), TFI_HOST, cmd]);
    let _ = frame.extend_from_slice(data);
    let _ = frame.extend_from_slice(&[sum.wrapping_neg(), 0x00]);
    Ok(frame)
}

/// Extract the payload of the reply to `cmd` from a raw read (ready byte
/// included).
pub fn decode_response(raw: &[u8], cmd: u8) -> Result<&[u8], NfcError> {
    let body = raw.get(1..).ok_or(NfcError::Bus)?;
    let start = body
        .windows(3)
        .position(|w| w == [0x00, 0x00, 0xFF])
        .ok_or(NfcError::Bus)?
        + 3;
    let (&len, rest) = body[start..].split_first().ok_or(NfcError::Bus)?;
    let (&lcs, rest) = rest.split_first().ok_or(NfcError::Bus)?;
    if len.wrapping_add(lcs) != 0 || len < 2 {
        return Err(NfcError::Bus);
    }
    let len = usize::from(len);
    let payload = rest.get(..len).ok_or(NfcError::Bus)?;
    let dcs = *rest.get(len).ok_or(NfcError::Bus)?;
    let sum = payload.iter().fold(dcs, |acc, b| acc.wrapping_add(*b));
    if sum != 0 {
        return Err(NfcError::Bus);
    }
    if payload[0] != TFI_PN532 || payload[1] != cmd.wrapping_add(1) {
        return Err(NfcError::Bus);
    }
    Ok(&payload[2..])
}

/// Selected-target details from an InListPassiveTarget reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassiveTarget {
    pub sak: u8,
    pub uid: CardUid,
}

/// `None` when no target was found.
pub fn parse_passive_target(data: &[u8]) -> Result<Option<PassiveTarget>, NfcError> {
    match data.first() {
        None => Err(NfcError::Bus),
        Some(0) => Ok(None),
        Some(_) => {
            // Tg, SENS_RES(2), SEL_RES, NFCIDLength, NFCID…
            let sak = *data.get(4).ok_or(NfcError::Bus)?;
            let uid_len = usize::from(*data.get(5).ok_or(NfcError::Bus)?);
            let uid = data.get(6..6 + uid_len).ok_or(NfcError::Bus)?;
            let uid = CardUid::from_slice(&uid[..uid.len().min(7)]).map_err(|()| NfcError::Bus)?;
            Ok(Some(PassiveTarget { sak, uid }))
        }
    }
}

// ── Driver ───────────────────────────────────────────────────

pub struct Pn532<I: I2c, D: DelayNs, R: RngCore> {
    i2c: I,
    delay: D,
    /// Source of the handshake's RndA.
    rng: R,
    target: Option<PassiveTarget>,
    /// NTAG 424 application selected on `target`.
    selected: bool,
    session: Option<Session>,
}

impl<I: I2c, D: DelayNs, R: RngCore> Pn532<I, D, R> {
    pub fn new(i2c: I, delay: D, rng: R) -> Self {
        Self {
            i2c,
            delay,
            rng,
            target: None,
            selected: false,
            session: None,
        }
    }

    pub fn release(self) -> (I, D) {
        (self.i2c, self.delay)
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), NfcError> {
        self.i2c.write(PN532_ADDR, bytes).map_err(|e| {
            debug!("PN532: write failed: {:?}", e.kind());
            NfcError::Bus
        })
    }

    /// Poll the ready byte, then read `buf.len()` bytes (ready byte included).
    fn read_ready(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<(), NfcError> {
        let mut waited = 0;
        loop {
            match self.i2c.read(PN532_ADDR, buf) {
                Ok(()) if buf[0] & 0x01 != 0 => return Ok(()),
                Ok(()) => {}
                // The PN532 NAKs its address while busy.
                Err(_) => {}
            }
            if waited >= timeout_ms {
                return Err(NfcError::Timeout);
            }
            self.delay.delay_ms(READY_POLL_MS);
            waited += READY_POLL_MS;
        }
    }

    fn command(&mut self, cmd: u8, data: &[u8], timeout_ms: u32) -> Result<FrameBuf, NfcError> {
        let frame = encode_command(cmd, data)?;
        self.write(&frame)?;

        let mut ack = [0u8; 7];
        self.read_ready(&mut ack, COMMAND_TIMEOUT_MS)?;
        if ack[1..] != ACK {
            warn!("PN532: no ACK for command {:#04x}", cmd);
            return Err(NfcError::Bus);
        }

        let mut raw = [0u8; MAX_FRAME];
        if let Err(e) = self.read_ready(&mut raw, timeout_ms) {
            // Abort the pending command so the next one is accepted.
            let _ = self.write(&ACK);
            return Err(e);
        }
        let payload = decode_response(&raw, cmd)?;
        FrameBuf::from_slice(payload).map_err(|()| NfcError::Bus)
    }

    /// Send an APDU to the selected target. Returns the response data and
    /// the status word.
    fn exchange(&mut self, apdu: &[u8]) -> Result<(FrameBuf, [u8; 2]), NfcError> {
        let mut data: heapless::Vec<u8, 56> = heapless::Vec::new();
        data.push(0x01).map_err(|_| NfcError::Bus)?;
        data.extend_from_slice(apdu).map_err(|()| NfcError::Bus)?;

        let reply = self.command(CMD_IN_DATA_EXCHANGE, &data, EXCHANGE_TIMEOUT_MS)?;
        match reply.first() {
            Some(0x00) => {}
            Some(status) => {
                debug!("PN532: InDataExchange status {:#04x}", status);
                self.selected = false;
                self.session = None;
                return Err(NfcError::NoCard);
            }
            None => return Err(NfcError::Bus),
        }
        let n = reply.len();
        if n < 3 {
            return Err(NfcError::Bus);
        }
        let body = FrameBuf::from_slice(&reply[1..n - 2]).map_err(|()| NfcError::Bus)?;
        Ok((body, [reply[n - 2], reply[n - 1]]))
    }

    /// Re-activate the card and select the application unless that is
    /// already done.
    fn ensure_selected(&mut self) -> Result<(), NfcError> {
        if self.selected {
            return Ok(());
        }
        if self.poll_card(ACTIVATION_TIMEOUT_MS)?.is_none() || !self.is_secure_card() {
            return Err(NfcError::NoCard);
        }
        Ok(())
    }
}

impl<I: I2c, D: DelayNs, R: RngCore> NfcReader for Pn532<I, D, R> {
    fn firmware_version(&mut self) -> Result<u32, NfcError> {
        let data = self
            .command(CMD_GET_FIRMWARE_VERSION, &[], COMMAND_TIMEOUT_MS)
            .map_err(|_| NfcError::NotDetected)?;
        let bytes: [u8; 4] = data
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or(NfcError::Bus)?;
        info!("PN532: chip PN5{:02x}, firmware {}.{}", bytes[0], bytes[1], bytes[2]);
        Ok(u32::from_be_bytes(bytes))
    }

    fn configure(&mut self) -> Result<(), NfcError> {
        // Normal mode, 1 s virtual-card timeout, IRQ enabled.
        self.command(CMD_SAM_CONFIGURATION, &[0x01, 0x14, 0x01], COMMAND_TIMEOUT_MS)?;
        // MxRtyATR, MxRtyPSL, MxRtyPassiveActivation: bounded discovery.
        self.command(CMD_RF_CONFIGURATION, &[0x05, 0xFF, 0x01, 0x10], COMMAND_TIMEOUT_MS)?;
        Ok(())
    }

    fn poll_card(&mut self, timeout_ms: u32) -> Result<Option<CardUid>, NfcError> {
        self.selected = false;
        self.session = None;
        let data = match self.command(CMD_IN_LIST_PASSIVE_TARGET, &[0x01, 0x00], timeout_ms) {
            Ok(data) => data,
            Err(NfcError::Timeout) => {
                self.target = None;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        self.target = parse_passive_target(&data)?;
        Ok(self.target.as_ref().map(|t| t.uid.clone()))
    }

    fn is_secure_card(&mut self) -> bool {
        let Some(target) = &self.target else {
            return false;
        };
        if target.sak & SAK_ISO14443_4 == 0 {
            return false;
        }
        self.selected = matches!(self.exchange(&SELECT_NTAG424_APP), Ok((_, SW_SELECTED)));
        self.selected
    }

    fn authenticate(&mut self, key_no: u8, key: &Key) -> Result<(), NfcError> {
        self.session = None;
        self.ensure_selected()?;

        let (challenge, sw) = self.exchange(&Ev2First::begin(key_no))?;
        if sw != SW_ADDITIONAL_FRAME {
            debug!("PN532: EV2First key {} refused: {:02x?}", key_no, sw);
            return Err(NfcError::AuthFailed);
        }

        let mut rnd_a = [0u8; 16];
        self.rng.fill_bytes(&mut rnd_a);
        let (handshake, answer) = Ev2First::respond(key, key_no, rnd_a, &challenge)?;
        let (reply, sw) = self.exchange(&answer)?;
        if sw != SW_OK {
            debug!("PN532: EV2First key {} rejected: {:02x?}", key_no, sw);
            return Err(NfcError::AuthFailed);
        }

        let session = handshake.finish(&reply)?;
        debug!("PN532: authenticated with key {}, TI {:02x?}", key_no, session.ti);
        self.session = Some(session);
        Ok(())
    }

    fn change_key(&mut self, key_no: u8, old_key: &Key, new_key: &Key) -> Result<(), NfcError> {
        let Some(session) = &self.session else {
            error!("PN532: ChangeKey (key {}) needs an authenticated session", key_no);
            return Err(NfcError::AuthFailed);
        };
        let own_key = key_no == session.key_no;
        let apdu = session.change_key(key_no, old_key, new_key);

        let (reply, sw) = self.exchange(&apdu)?;
        if sw != SW_OK {
            warn!("PN532: ChangeKey {} refused: {:02x?}", key_no, sw);
            self.session = None;
            return Err(NfcError::ChangeKeyFailed);
        }
        if own_key {
            // The card ends the session once its own key is replaced.
            self.session = None;
            return Ok(());
        }
        let verified = self
            .session
            .as_mut()
            .is_some_and(|session| session.accept_response(&reply));
        if !verified {
            warn!("PN532: ChangeKey {} response MAC mismatch", key_no);
            self.session = None;
            return Err(NfcError::ChangeKeyFailed);
        }
        Ok(())
    }
}
