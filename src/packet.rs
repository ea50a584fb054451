//! # Packet encoding
//!
//! A DSI message is turned into the two words that trigger the transmission
//! (TXPKT1H and TXPKT1C) plus the payload data destined for the FIFOs.
//!
//! The command FIFO is byte wide but only [`CMD_FIFO_DEPTH`] entries deep.
//! The pixel FIFO is word wide and much deeper. Long payloads are therefore
//! split so that the first `len % 4` bytes go to the command FIFO and the
//! remaining whole words go to the pixel FIFO, which is then drained by the
//! secondary display (DISP1) path.

use crate::{regs::Field, Error};

/// Depth of the byte wide command FIFO.
pub const CMD_FIFO_DEPTH: usize = 16;
/// Depth of the pixel FIFO in words.
pub const PIX_FIFO_DEPTH: usize = 256;
/// Width of one pixel FIFO entry in bytes.
pub const PIX_FIFO_WIDTH: usize = 4;

/// MIPI DSI data types the host can transmit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DataType {
    ColorModeOff = 0x02,
    ColorModeOn = 0x12,
    ShutdownPeripheral = 0x22,
    TurnOnPeripheral = 0x32,
    GenericShortWrite0 = 0x03,
    GenericShortWrite1 = 0x13,
    GenericShortWrite2 = 0x23,
    GenericRead0 = 0x04,
    GenericRead1 = 0x14,
    GenericRead2 = 0x24,
    DcsShortWrite = 0x05,
    DcsShortWriteParam = 0x15,
    DcsRead = 0x06,
    SetMaximumReturnPacketSize = 0x37,
    NullPacket = 0x09,
    BlankingPacket = 0x19,
    GenericLongWrite = 0x29,
    DcsLongWrite = 0x39,
}

impl DataType {
    /// Whether packets of this type carry a word count and payload.
    pub const fn is_long(self) -> bool {
        matches!(
            self,
            DataType::NullPacket
                | DataType::BlankingPacket
                | DataType::GenericLongWrite
                | DataType::DcsLongWrite
        )
    }

    /// Number of parameter bytes a short packet of this type carries.
    const fn short_params(self) -> usize {
        match self {
            DataType::ColorModeOff
            | DataType::ColorModeOn
            | DataType::ShutdownPeripheral
            | DataType::TurnOnPeripheral
            | DataType::GenericShortWrite0
            | DataType::GenericRead0 => 0,
            DataType::GenericShortWrite1
            | DataType::GenericRead1
            | DataType::DcsShortWrite
            | DataType::DcsRead => 1,
            _ => 2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Payload<'a> {
    Inline([u8; 2], u8),
    Borrowed(&'a [u8]),
}

/// A message to the peripheral.
#[derive(Debug, Clone, Copy)]
pub struct Message<'a> {
    data_type: DataType,
    channel: u8,
    low_power: bool,
    payload: Payload<'a>,
}

impl<'a> Message<'a> {
    /// Message of type `data_type` carrying `payload` on channel 0.
    pub fn new(data_type: DataType, payload: &'a [u8]) -> Self {
        Self {
            data_type,
            channel: 0,
            low_power: false,
            payload: Payload::Borrowed(payload),
        }
    }

    fn inline(data_type: DataType, bytes: [u8; 2], len: u8) -> Self {
        Self {
            data_type,
            channel: 0,
            low_power: false,
            payload: Payload::Inline(bytes, len),
        }
    }

    /// DCS write. `payload` starts with the DCS command byte.
    pub fn dcs_write(payload: &'a [u8]) -> Self {
        let data_type = match payload.len() {
            0 | 1 => DataType::DcsShortWrite,
            2 => DataType::DcsShortWriteParam,
            _ => DataType::DcsLongWrite,
        };
        Self::new(data_type, payload)
    }

    /// DCS read of `command`.
    pub fn dcs_read(command: u8) -> Self {
        Self::inline(DataType::DcsRead, [command, 0], 1)
    }

    /// Generic write, short or long depending on the payload length.
    pub fn generic_write(payload: &'a [u8]) -> Self {
        let data_type = match payload.len() {
            0 => DataType::GenericShortWrite0,
            1 => DataType::GenericShortWrite1,
            2 => DataType::GenericShortWrite2,
            _ => DataType::GenericLongWrite,
        };
        Self::new(data_type, payload)
    }

    /// Generic read with up to two parameter bytes.
    pub fn generic_read(params: &'a [u8]) -> Self {
        let data_type = match params.len() {
            0 => DataType::GenericRead0,
            1 => DataType::GenericRead1,
            _ => DataType::GenericRead2,
        };
        Self::new(data_type, params)
    }

    /// Limits the size of the responses the peripheral may send.
    pub fn set_maximum_return_packet_size(size: u16) -> Self {
        Self::inline(DataType::SetMaximumReturnPacketSize, size.to_le_bytes(), 2)
    }

    /// Send on virtual channel `channel`.
    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    /// Send in low-power (escape) mode instead of high speed.
    pub fn with_low_power(mut self, low_power: bool) -> Self {
        self.low_power = low_power;
        self
    }

    /// MIPI data type of the packet.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Virtual channel the packet is sent on.
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Whether the packet is sent in low-power mode.
    pub fn is_low_power(&self) -> bool {
        self.low_power
    }

    /// Parameter or payload bytes.
    pub fn payload(&self) -> &[u8] {
        match &self.payload {
            Payload::Inline(bytes, len) => &bytes[..*len as usize],
            Payload::Borrowed(bytes) => bytes,
        }
    }
}

/// Which display engine sends the packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PacketPath {
    /// Short packet, or long packet entirely in the command FIFO.
    Short = 0,
    /// DISP0, the video engine.
    Primary = 1,
    /// DISP1, reading the payload from the pixel FIFO.
    Secondary = 2,
}

/// Splits a long payload of `len` bytes into a command FIFO byte count and a
/// pixel FIFO word count.
pub const fn split_payload(len: usize) -> (usize, usize) {
    let cmd_len = len % PIX_FIFO_WIDTH;
    (cmd_len, (len - cmd_len) / PIX_FIFO_WIDTH)
}

/// A message in register form, ready for submission.
#[derive(Debug, Clone, Copy)]
pub struct EncodedPacket<'a> {
    header: u32,
    control: u32,
    cmd: &'a [u8],
    pix: &'a [u8],
}

impl<'a> EncodedPacket<'a> {
    /// Encodes `msg`. A non-zero `rx_len` asks the peripheral for a
    /// response.
    ///
    /// Fails without side effects when the message is malformed or does not
    /// fit the FIFOs.
    pub fn new(msg: &Message<'a>, rx_len: usize) -> Result<Self, Error> {
        if msg.channel > 3 {
            return Err(Error::InvalidMessage);
        }

        let payload = match msg.payload {
            Payload::Inline(..) => {
                // Inline payloads are short packets only.
                return Self::short(msg, msg.payload(), rx_len);
            }
            Payload::Borrowed(bytes) => bytes,
        };

        if !msg.data_type.is_long() {
            return Self::short(msg, payload, rx_len);
        }

        let (cmd_len, pix_words) = split_payload(payload.len());
        if pix_words > PIX_FIFO_DEPTH || cmd_len > CMD_FIFO_DEPTH {
            return Err(Error::ExceedingFifo);
        }
        let word_count = u16::try_from(payload.len()).map_err(|_| Error::ExceedingFifo)?;
        debug!(
            "long packet of {} bytes: {} command bytes, {} pixel words",
            payload.len(),
            cmd_len,
            pix_words
        );

        let (cmd, pix) = payload.split_at(cmd_len);
        let path = if pix_words > 0 {
            PacketPath::Secondary
        } else {
            PacketPath::Short
        };

        Ok(Self {
            header: header_word(msg, word_count.to_le_bytes())
                | TXPKT1H_BC_CMDFIFO.set(cmd_len as u32),
            control: control_word(msg, rx_len, path),
            cmd,
            pix,
        })
    }

    fn short(msg: &Message<'a>, params: &[u8], rx_len: usize) -> Result<Self, Error> {
        if params.len() != msg.data_type.short_params() {
            return Err(Error::InvalidMessage);
        }

        let mut bytes = [0u8; 2];
        bytes[..params.len()].copy_from_slice(params);

        Ok(Self {
            header: header_word(msg, bytes),
            control: control_word(msg, rx_len, PacketPath::Short),
            cmd: &[],
            pix: &[],
        })
    }

    /// TXPKT1H value.
    pub fn header(&self) -> u32 {
        self.header
    }

    /// TXPKT1C value. Writing it starts the transmission.
    pub fn control(&self) -> u32 {
        self.control
    }

    /// Bytes for the command FIFO.
    pub fn cmd_fifo(&self) -> &'a [u8] {
        self.cmd
    }

    /// Number of words for the pixel FIFO.
    pub fn pix_fifo_len(&self) -> usize {
        self.pix.len() / PIX_FIFO_WIDTH
    }

    /// Words for the pixel FIFO, little endian.
    pub fn pix_fifo(&self) -> impl Iterator<Item = u32> + 'a {
        self.pix
            .chunks_exact(PIX_FIFO_WIDTH)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
    }

    /// Whether the peripheral is asked for a response.
    pub fn expects_response(&self) -> bool {
        TXPKT1C_CMD_CTRL.get(self.control) == CMD_CTRL_RX
    }

    /// Engine the control word routes the packet through.
    pub fn path(&self) -> PacketPath {
        match TXPKT1C_DISPLAY_NO.get(self.control) {
            0 => PacketPath::Short,
            1 => PacketPath::Primary,
            _ => PacketPath::Secondary,
        }
    }
}

fn header_word(msg: &Message<'_>, param: [u8; 2]) -> u32 {
    let data_id = (msg.channel as u32) << 6 | msg.data_type as u32;
    TXPKT1H_BC_DT.set(data_id) | TXPKT1H_BC_PARAM.set(u16::from_le_bytes(param) as u32)
}

fn control_word(msg: &Message<'_>, rx_len: usize, path: PacketPath) -> u32 {
    let mut control = TXPKT1C_CMD_REPEAT.set(1)
        | TXPKT1C_DISPLAY_NO.set(path as u32)
        | TXPKT1C_CMD_CTRL.set(if rx_len > 0 { CMD_CTRL_RX } else { CMD_CTRL_TX })
        | TXPKT1C_CMD_EN;

    if msg.low_power {
        control |= TXPKT1C_CMD_MODE_LP;
    }
    if msg.data_type.is_long() {
        control |= TXPKT1C_CMD_TYPE_LONG;
    }
    control
}

const TXPKT1H_BC_CMDFIFO: Field = Field::new(31, 24);
const TXPKT1H_BC_PARAM: Field = Field::new(23, 8);
const TXPKT1H_BC_DT: Field = Field::new(7, 0);

const TXPKT1C_CMD_REPEAT: Field = Field::new(23, 10);
const TXPKT1C_DISPLAY_NO: Field = Field::new(9, 8);
const TXPKT1C_CMD_CTRL: Field = Field::new(5, 4);
const CMD_CTRL_TX: u32 = 0;
const CMD_CTRL_RX: u32 = 1;
const TXPKT1C_CMD_MODE_LP: u32 = 1 << 3;
const TXPKT1C_CMD_TYPE_LONG: u32 = 1 << 2;
pub(crate) const TXPKT1C_CMD_EN: u32 = 1 << 0;
