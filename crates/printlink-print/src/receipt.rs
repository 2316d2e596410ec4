// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// ESC/POS byte builder for receipt printers.
//
// Stateless encoding only: the builder accumulates command bytes and text,
// and `build()` hands back the buffer.  Text is written as-is, so callers
// are responsible for the printer's code page.

const ESC: u8 = 0x1b;
const GS: u8 = 0x1d;

/// Horizontal justification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Center,
    Right,
}

impl Align {
    fn code(self) -> u8 {
        match self {
            Align::Left => 0,
            Align::Center => 1,
            Align::Right => 2,
        }
    }
}

/// Accumulates an ESC/POS command stream.
#[derive(Debug, Clone, Default)]
pub struct EscPos {
    buf: Vec<u8>,
}

impl EscPos {
    pub fn new() -> Self {
        Self::default()
    }

    /// `ESC @`: reset the printer to its power-on state.
    pub fn init(mut self) -> Self {
        self.buf.extend_from_slice(&[ESC, b'@']);
        self
    }

    pub fn align(mut self, align: Align) -> Self {
        self.buf.extend_from_slice(&[ESC, b'a', align.code()]);
        self
    }

    pub fn bold(mut self, on: bool) -> Self {
        self.buf.extend_from_slice(&[ESC, b'E', u8::from(on)]);
        self
    }

    /// Switch between font A (normal) and the smaller font B.
    pub fn font_b(mut self, on: bool) -> Self {
        self.buf.extend_from_slice(&[ESC, b'M', u8::from(on)]);
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.buf.extend_from_slice(text.as_bytes());
        self
    }

    /// Text followed by a line feed.
    pub fn line(self, text: &str) -> Self {
        self.text(text).text("\n")
    }

    /// `ESC d n`: print and feed `lines` lines.
    pub fn feed(mut self, lines: u8) -> Self {
        self.buf.extend_from_slice(&[ESC, b'd', lines]);
        self
    }

    /// Store and print a QR code with the given module size (1..=16).
    ///
    /// Uses the `GS ( k` function 167 (size), 180 (store) and 181 (print)
    /// sequence.  Data longer than the printer's symbol capacity is the
    /// printer's problem; we only cap at the 16-bit length field.
    pub fn qr_code(mut self, data: &str, module_size: u8) -> Self {
        let size = module_size.clamp(1, 16);
        self.buf
            .extend_from_slice(&[GS, b'(', b'k', 3, 0, 0x31, 0x43, size]);

        let bytes = data.as_bytes();
        let bytes = &bytes[..bytes.len().min(u16::MAX as usize - 3)];
        let len = (bytes.len() + 3) as u16;
        let [p_l, p_h] = len.to_le_bytes();
        self.buf
            .extend_from_slice(&[GS, b'(', b'k', p_l, p_h, 0x31, 0x50, 0x30]);
        self.buf.extend_from_slice(bytes);

        self.buf
            .extend_from_slice(&[GS, b'(', b'k', 3, 0, 0x31, 0x51, 0x30]);
        self
    }

    /// `GS V 0`: full cut.
    pub fn cut(mut self) -> Self {
        self.buf.extend_from_slice(&[GS, b'V', 0]);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}

/// A demo receipt exercising every builder command. Handy for checking a
/// printer's wiring with `printlink sample-receipt`.
pub fn sample_receipt() -> Vec<u8> {
    let items: [(&str, u32, u32); 3] = [
        ("Flat white", 2, 740),
        ("Croissant", 1, 325),
        ("Sparkling water", 1, 250),
    ];
    let subtotal: u32 = items.iter().map(|(_, qty, cents)| qty * cents).sum();

    let mut receipt = EscPos::new()
        .init()
        .align(Align::Center)
        .bold(true)
        .line("PRINTLINK TEST RECEIPT")
        .bold(false)
        .font_b(true)
        .line("If you can read this, the printer is wired up.")
        .font_b(false)
        .line("")
        .align(Align::Left)
        .line("Item                 Qty   Amount")
        .line("---------------------------------");

    for (name, qty, cents) in items {
        let amount = qty * cents;
        receipt = receipt.line(&format!(
            "{name:<20} x{qty:<4} {:>3}.{:02}",
            amount / 100,
            amount % 100
        ));
    }

    receipt
        .line("---------------------------------")
        .line(&format!(
            "{:<27} {:>3}.{:02}",
            "Total",
            subtotal / 100,
            subtotal % 100
        ))
        .line("")
        .align(Align::Center)
        .qr_code("https://example.invalid/printlink", 4)
        .feed(3)
        .cut()
        .build()
}
