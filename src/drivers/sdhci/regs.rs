//! SDHCI Register Definitions
//!
//! This module defines the standard SDHCI (SD Host Controller Interface)
//! registers and bitfields as implemented by the BCM2835 EMMC block. The
//! window only accepts 32-bit accesses; offsets below are byte offsets and
//! sub-word registers are reached through the emulation in [`super::io`].

use tock_registers::register_bitfields;

// ============================================================================
// Register Offsets
// ============================================================================

/// SDMA System Address / Argument 2
pub const SDHCI_DMA_ADDRESS: u16 = 0x00;

/// Argument 2 (auto-CMD23 block count), aliases the SDMA address
pub const SDHCI_ARGUMENT2: u16 = SDHCI_DMA_ADDRESS;

/// Block Size Register
pub const SDHCI_BLOCK_SIZE: u16 = 0x04;

/// Block Count Register
pub const SDHCI_BLOCK_COUNT: u16 = 0x06;

/// Argument Register
pub const SDHCI_ARGUMENT: u16 = 0x08;

/// Transfer Mode Register
pub const SDHCI_TRANSFER_MODE: u16 = 0x0C;

/// Command Register (write-only on this controller)
pub const SDHCI_COMMAND: u16 = 0x0E;

/// Response Register (4 DWORDs: 0x10, 0x14, 0x18, 0x1C)
pub const SDHCI_RESPONSE: u16 = 0x10;

/// Buffer Data Port Register
pub const SDHCI_BUFFER: u16 = 0x20;

/// Present State Register
pub const SDHCI_PRESENT_STATE: u16 = 0x24;

/// Host Control Register
pub const SDHCI_HOST_CONTROL: u16 = 0x28;

/// Power Control Register
pub const SDHCI_POWER_CONTROL: u16 = 0x29;

/// Block Gap Control Register
pub const SDHCI_BLOCK_GAP_CONTROL: u16 = 0x2A;

/// Wakeup Control Register
pub const SDHCI_WAKEUP_CONTROL: u16 = 0x2B;

/// Clock Control Register
pub const SDHCI_CLOCK_CONTROL: u16 = 0x2C;

/// Timeout Control Register
pub const SDHCI_TIMEOUT_CONTROL: u16 = 0x2E;

/// Software Reset Register
pub const SDHCI_SOFTWARE_RESET: u16 = 0x2F;

/// Normal Interrupt Status Register
pub const SDHCI_INT_STATUS: u16 = 0x30;

/// Normal Interrupt Status Enable Register
pub const SDHCI_INT_ENABLE: u16 = 0x34;

/// Normal Interrupt Signal Enable Register
pub const SDHCI_SIGNAL_ENABLE: u16 = 0x38;

/// Auto CMD Error Status Register
pub const SDHCI_ACMD12_ERR: u16 = 0x3C;

/// Host Control 2 Register
pub const SDHCI_HOST_CONTROL2: u16 = 0x3E;

/// Capabilities Register
pub const SDHCI_CAPABILITIES: u16 = 0x40;

/// Capabilities Register 1 (upper 32 bits)
pub const SDHCI_CAPABILITIES_1: u16 = 0x44;

/// Maximum Current Capabilities Register
pub const SDHCI_MAX_CURRENT: u16 = 0x48;

/// Slot Interrupt Status Register
pub const SDHCI_SLOT_INT_STATUS: u16 = 0xFC;

/// Host Controller Version Register
pub const SDHCI_HOST_VERSION: u16 = 0xFE;

// ============================================================================
// Block Size Register (0x04) Bitfields
// ============================================================================

/// Default SDMA buffer boundary argument (7 = 512KB)
pub const SDHCI_DEFAULT_BOUNDARY_ARG: u16 = 7;

/// Largest block size the 12-bit BLOCK_SIZE field is used for
pub const SDHCI_MAX_BLOCK_SIZE: u32 = 2048;

/// Largest count the 16-bit BLOCK_COUNT register holds
pub const SDHCI_MAX_BLOCK_COUNT: u32 = 0xFFFF;

/// Create block size value with SDMA buffer boundary
/// boundary: 0=4K, 1=8K, 2=16K, 3=32K, 4=64K, 5=128K, 6=256K, 7=512K
#[inline]
pub const fn make_blksz(boundary: u16, blksz: u16) -> u16 {
    ((boundary & 0x7) << 12) | (blksz & 0xFFF)
}

// ============================================================================
// Transfer Mode (0x0C) and Command (0x0E) Registers
// ============================================================================

register_bitfields! [
    u16,
    /// Transfer Mode Register (0x0C)
    pub TRANSFER_MODE [
        /// DMA Enable
        DMA OFFSET(0) NUMBITS(1) [],
        /// Block Count Enable
        BLK_CNT_EN OFFSET(1) NUMBITS(1) [],
        /// Auto CMD12 Enable
        AUTO_CMD12 OFFSET(2) NUMBITS(1) [],
        /// Auto CMD23 Enable
        AUTO_CMD23 OFFSET(3) NUMBITS(1) [],
        /// Data Transfer Direction Read (1 = read, 0 = write)
        READ OFFSET(4) NUMBITS(1) [],
        /// Multi Block Select
        MULTI OFFSET(5) NUMBITS(1) []
    ],

    /// Command Register (0x0E)
    pub COMMAND [
        /// Response type
        RESP OFFSET(0) NUMBITS(2) [
            NoResponse = 0,
            Long = 1,
            Short = 2,
            ShortBusy = 3
        ],
        /// Command CRC check enable
        CRC OFFSET(3) NUMBITS(1) [],
        /// Command index check enable
        INDEX_CHECK OFFSET(4) NUMBITS(1) [],
        /// Data present select
        DATA OFFSET(5) NUMBITS(1) [],
        /// Command type
        TYPE OFFSET(6) NUMBITS(2) [],
        /// Command index
        INDEX OFFSET(8) NUMBITS(6) []
    ],

    /// Clock Control Register (0x2C)
    pub CLOCK_CONTROL [
        /// Internal Clock Enable
        INT_EN OFFSET(0) NUMBITS(1) [],
        /// Internal Clock Stable
        INT_STABLE OFFSET(1) NUMBITS(1) [],
        /// SD Clock Enable
        CARD_EN OFFSET(2) NUMBITS(1) [],
        /// Upper bits of SDCLK Frequency Select
        DIV_HI OFFSET(6) NUMBITS(2) [],
        /// SDCLK Frequency Select
        DIV_LO OFFSET(8) NUMBITS(8) []
    ]
];

/// Auto CMD12 and CMD23 enables
pub const SDHCI_TRNS_AUTO_CMD_MASK: u16 = (1 << 2) | (1 << 3);

// ============================================================================
// Present State Register (0x24) Bitfields
// ============================================================================

/// Command Inhibit (CMD)
pub const SDHCI_CMD_INHIBIT: u32 = 1 << 0;

/// Command Inhibit (DAT)
pub const SDHCI_DATA_INHIBIT: u32 = 1 << 1;

/// Buffer Write Enable
pub const SDHCI_SPACE_AVAILABLE: u32 = 1 << 10;

/// Buffer Read Enable
pub const SDHCI_DATA_AVAILABLE: u32 = 1 << 11;

/// Card Inserted
pub const SDHCI_CARD_PRESENT: u32 = 1 << 16;

// ============================================================================
// Host Control Register (0x28) Bitfields
// ============================================================================

/// Data Transfer Width (1 = 4-bit mode)
pub const SDHCI_CTRL_4BITBUS: u8 = 1 << 1;

/// High Speed Enable
pub const SDHCI_CTRL_HISPD: u8 = 1 << 2;

/// Extended Data Transfer Width (1 = 8-bit mode)
pub const SDHCI_CTRL_8BITBUS: u8 = 1 << 5;

// ============================================================================
// Power Control Register (0x29) Bitfields
// ============================================================================

/// SD Bus Power
pub const SDHCI_POWER_ON: u8 = 1 << 0;

/// SD Bus Voltage Select - 3.3V
pub const SDHCI_POWER_330: u8 = 0x0E;

// ============================================================================
// Clock Control Register (0x2C) Bitfields
// ============================================================================

/// Divider mask (8-bit)
pub const SDHCI_DIV_MASK: u16 = 0xFF;

/// Divider mask length
pub const SDHCI_DIV_MASK_LEN: u16 = 8;

/// Upper divider mask
pub const SDHCI_DIV_HI_MASK: u16 = 0x300;

/// Maximum divider for SDHCI 3.0+ (10-bit, even values only)
pub const SDHCI_MAX_DIV_SPEC_300: u32 = 2046;

// ============================================================================
// Timeout Control Register (0x2E)
// ============================================================================

/// Data timeout counter value: TMCLK * 2^27
pub const SDHCI_TIMEOUT_VAL: u8 = 0x0E;

// ============================================================================
// Software Reset Register (0x2F) Bitfields
// ============================================================================

/// Software Reset For All
pub const SDHCI_RESET_ALL: u8 = 1 << 0;

/// Software Reset For CMD Line
pub const SDHCI_RESET_CMD: u8 = 1 << 1;

/// Software Reset For DAT Line
pub const SDHCI_RESET_DATA: u8 = 1 << 2;

// ============================================================================
// Interrupt Status/Enable Registers (0x30, 0x34, 0x38) Bitfields
// ============================================================================

/// Command Complete
pub const SDHCI_INT_RESPONSE: u32 = 1 << 0;

/// Transfer Complete
pub const SDHCI_INT_DATA_END: u32 = 1 << 1;

/// Block Gap Event
pub const SDHCI_INT_BLK_GAP: u32 = 1 << 2;

/// DMA Interrupt
pub const SDHCI_INT_DMA_END: u32 = 1 << 3;

/// Buffer Write Ready
pub const SDHCI_INT_SPACE_AVAIL: u32 = 1 << 4;

/// Buffer Read Ready
pub const SDHCI_INT_DATA_AVAIL: u32 = 1 << 5;

/// Card Insertion
pub const SDHCI_INT_CARD_INSERT: u32 = 1 << 6;

/// Card Removal
pub const SDHCI_INT_CARD_REMOVE: u32 = 1 << 7;

/// Card Interrupt
pub const SDHCI_INT_CARD_INT: u32 = 1 << 8;

/// Error Interrupt
pub const SDHCI_INT_ERROR: u32 = 1 << 15;

/// Command Timeout Error
pub const SDHCI_INT_TIMEOUT: u32 = 1 << 16;

/// Command CRC Error
pub const SDHCI_INT_CRC: u32 = 1 << 17;

/// Command End Bit Error
pub const SDHCI_INT_END_BIT: u32 = 1 << 18;

/// Command Index Error
pub const SDHCI_INT_INDEX: u32 = 1 << 19;

/// Data Timeout Error
pub const SDHCI_INT_DATA_TIMEOUT: u32 = 1 << 20;

/// Data CRC Error
pub const SDHCI_INT_DATA_CRC: u32 = 1 << 21;

/// Data End Bit Error
pub const SDHCI_INT_DATA_END_BIT: u32 = 1 << 22;

/// Current Limit Error
pub const SDHCI_INT_BUS_POWER: u32 = 1 << 23;

/// Auto CMD Error
pub const SDHCI_INT_ACMD12ERR: u32 = 1 << 24;

/// ADMA Error
pub const SDHCI_INT_ADMA_ERROR: u32 = 1 << 25;

/// Command-related interrupt mask
pub const SDHCI_INT_CMD_MASK: u32 =
    SDHCI_INT_RESPONSE | SDHCI_INT_TIMEOUT | SDHCI_INT_CRC | SDHCI_INT_END_BIT | SDHCI_INT_INDEX;

/// Data-related interrupt mask
pub const SDHCI_INT_DATA_MASK: u32 = SDHCI_INT_DATA_END
    | SDHCI_INT_DMA_END
    | SDHCI_INT_SPACE_AVAIL
    | SDHCI_INT_DATA_AVAIL
    | SDHCI_INT_DATA_TIMEOUT
    | SDHCI_INT_DATA_CRC
    | SDHCI_INT_DATA_END_BIT
    | SDHCI_INT_ADMA_ERROR;

/// Interrupts armed at initialization
pub const SDHCI_INT_DEFAULT_ENABLE: u32 = SDHCI_INT_BUS_POWER
    | SDHCI_INT_DATA_END_BIT
    | SDHCI_INT_DATA_CRC
    | SDHCI_INT_DATA_TIMEOUT
    | SDHCI_INT_INDEX
    | SDHCI_INT_END_BIT
    | SDHCI_INT_CRC
    | SDHCI_INT_TIMEOUT
    | SDHCI_INT_DATA_END
    | SDHCI_INT_RESPONSE;

/// Interrupts only the PIO backend needs
pub const SDHCI_INT_PIO_MASK: u32 = SDHCI_INT_DATA_AVAIL | SDHCI_INT_SPACE_AVAIL;

/// Interrupts only the DMA backend needs
pub const SDHCI_INT_DMA_MASK: u32 = SDHCI_INT_DMA_END | SDHCI_INT_ADMA_ERROR;

// ============================================================================
// Host Control 2 Register (0x3E) Bitfields
// ============================================================================

/// 1.8V Signaling Enable
pub const SDHCI_CTRL_VDD_180: u16 = 1 << 3;

/// Driver Strength Select mask
pub const SDHCI_CTRL_DRV_TYPE_MASK: u16 = 0x0030;

/// Driver Type B
pub const SDHCI_CTRL_DRV_TYPE_B: u16 = 0x0000;

/// Driver Type A
pub const SDHCI_CTRL_DRV_TYPE_A: u16 = 0x0010;

/// Driver Type C
pub const SDHCI_CTRL_DRV_TYPE_C: u16 = 0x0020;

/// Driver Type D
pub const SDHCI_CTRL_DRV_TYPE_D: u16 = 0x0030;

// ============================================================================
// SD/MMC Commands the host has to recognise
// ============================================================================

/// STOP_TRANSMISSION - Forces card to stop transmission
pub const MMC_CMD_STOP_TRANSMISSION: u8 = 12;

/// BUS_TEST_R - Reads the reversed bus testing pattern (MMC)
pub const MMC_CMD_BUS_TEST_R: u8 = 14;

/// READ_MULTIPLE_BLOCK - Continuously reads blocks until STOP_TRANSMISSION
pub const MMC_CMD_READ_MULTIPLE_BLOCK: u8 = 18;

/// SET_BLOCK_COUNT - Sets block count for next multi-block command
pub const MMC_CMD_SET_BLOCK_COUNT: u8 = 23;

/// WRITE_MULTIPLE_BLOCK - Continuously writes blocks until STOP_TRANSMISSION
pub const MMC_CMD_WRITE_MULTIPLE_BLOCK: u8 = 25;

/// Multi-block data opcode
#[inline]
pub const fn mmc_op_multi(opcode: u8) -> bool {
    opcode == MMC_CMD_READ_MULTIPLE_BLOCK || opcode == MMC_CMD_WRITE_MULTIPLE_BLOCK
}

// ============================================================================
// Supported voltage window (OCR bits)
// ============================================================================

/// 3.2-3.3V
pub const MMC_VDD_32_33: u32 = 1 << 20;

/// 3.3-3.4V
pub const MMC_VDD_33_34: u32 = 1 << 21;
