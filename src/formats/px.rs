//! PX compression as used by the AT4PX container.
//!
//! The stream is a sequence of blocks: one command byte followed by up to
//! eight operations. A set command bit means "copy the next byte as is".
//! A cleared bit means the next byte's high nibble selects either one of the
//! nine nibble patterns (when it matches a control flag) or a lookback copy.

use std::collections::VecDeque;

const PX_LOOKBACK_BUFFER_SIZE: usize = 4096;
const PX_MAX_MATCH_SEQLEN: usize = 18;
const PX_MIN_MATCH_SEQLEN: usize = 3;
const PX_NB_POSSIBLE_SEQUENCES_LEN: usize = 7;
pub const PX_CONTROL_FLAG_COUNT: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Operation {
    CopyAsIs = -1,
    CopyNybble4Times = 0,
    CopyNybble4TimesExIncrallDecrnybble0 = 1,
    CopyNybble4TimesExDecrnybble1 = 2,
    CopyNybble4TimesExDecrnybble2 = 3,
    CopyNybble4TimesExDecrnybble3 = 4,
    CopyNybble4TimesExDecrallIncrnybble0 = 5,
    CopyNybble4TimesExIncrnybble1 = 6,
    CopyNybble4TimesExIncrnybble2 = 7,
    CopyNybble4TimesExIncrnybble3 = 8,
    CopySequence = 9,
}

/// Compression levels for PX compression
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PXCompLevel {
    /// No compression - All command bytes are 0xFF, and values are stored uncompressed
    Level0 = 0,
    /// Low compression - Handle 4 byte patterns using only control flag 0
    Level1 = 1,
    /// Medium compression - Handle 4 byte patterns using all control flags
    Level2 = 2,
    /// Full compression - Handle everything above, plus repeating sequences
    Level3 = 3,
}

impl PXCompLevel {
    pub fn from_u8(level: u8) -> Option<Self> {
        match level {
            0 => Some(PXCompLevel::Level0),
            1 => Some(PXCompLevel::Level1),
            2 => Some(PXCompLevel::Level2),
            3 => Some(PXCompLevel::Level3),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct CompOp {
    op_type: Operation,
    high_nibble: u8,
    low_nibble: u8,
    next_byte_value: u8,
}

impl CompOp {
    fn new() -> Self {
        CompOp {
            op_type: Operation::CopyAsIs,
            high_nibble: 0,
            low_nibble: 0,
            next_byte_value: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct MatchingSeq {
    pos: usize,
    length: usize,
}

/// Output of a PX compression run
#[derive(Debug, Clone)]
pub struct PxCompressed {
    pub control_flags: [u8; PX_CONTROL_FLAG_COUNT],
    pub data: Vec<u8>,
}

pub struct PxCompressor<'a> {
    uncompressed_data: &'a [u8],
    compression_level: PXCompLevel,
    should_search_first: bool,
    control_flags: [u8; PX_CONTROL_FLAG_COUNT],
    compressed_data: Vec<u8>,
    pending_operations: VecDeque<CompOp>,
    high_nibble_lengths_possible: Vec<u8>,
    cursor: usize,
}

impl<'a> PxCompressor<'a> {
    pub fn new(
        uncompressed_data: &'a [u8],
        compression_level: PXCompLevel,
        should_search_first: bool,
    ) -> Self {
        PxCompressor {
            uncompressed_data,
            compression_level,
            should_search_first,
            control_flags: [0; PX_CONTROL_FLAG_COUNT],
            compressed_data: Vec::new(),
            pending_operations: VecDeque::new(),
            high_nibble_lengths_possible: Vec::new(),
            cursor: 0,
        }
    }

    fn reset(&mut self) {
        self.control_flags = [0; PX_CONTROL_FLAG_COUNT];
        self.compressed_data = Vec::new();
        self.pending_operations = VecDeque::new();
        // 0 and 0xF are always reserved for sequence lengths
        self.high_nibble_lengths_possible = vec![0, 0xF];
        self.cursor = 0;
    }

    pub fn compress(&mut self) -> Result<PxCompressed, String> {
        self.reset();

        if self.uncompressed_data.len() > i32::MAX as usize {
            return Err(format!(
                "PX compression input too long: {} bytes",
                self.uncompressed_data.len()
            ));
        }

        let input_size = self.uncompressed_data.len();
        self.compressed_data = Vec::with_capacity(input_size + input_size.div_ceil(8));

        while self.handle_a_block() {}

        self.build_ctrl_flags_list();
        self.output_all_operations();

        Ok(PxCompressed {
            control_flags: self.control_flags,
            data: std::mem::take(&mut self.compressed_data),
        })
    }

    /// Queues up to 8 operations. Returns false once the input is exhausted.
    fn handle_a_block(&mut self) -> bool {
        if self.cursor >= self.uncompressed_data.len() {
            return false;
        }
        for _ in 0..8 {
            if self.cursor >= self.uncompressed_data.len() {
                break;
            }
            let operation = self.determine_best_operation();
            self.pending_operations.push_back(operation);
        }
        true
    }

    fn determine_best_operation(&mut self) -> CompOp {
        let mut operation = CompOp::new();
        let level = self.compression_level;
        let cursor = self.cursor;

        let amount_to_advance = if self.should_search_first
            && level >= PXCompLevel::Level3
            && self.can_use_a_matching_sequence(cursor, &mut operation)
        {
            operation.high_nibble as usize + PX_MIN_MATCH_SEQLEN
        } else if level >= PXCompLevel::Level1
            && self.can_compress_to_2_in_1_byte(cursor, &mut operation)
        {
            2
        } else if level >= PXCompLevel::Level2
            && self.can_compress_to_2_in_1_byte_with_manipulation(cursor, &mut operation)
        {
            2
        } else if !self.should_search_first
            && level >= PXCompLevel::Level3
            && self.can_use_a_matching_sequence(cursor, &mut operation)
        {
            operation.high_nibble as usize + PX_MIN_MATCH_SEQLEN
        } else {
            let b = self.uncompressed_data[cursor];
            operation = CompOp::new();
            operation.high_nibble = (b >> 4) & 0x0F;
            operation.low_nibble = b & 0x0F;
            1
        };

        self.cursor += amount_to_advance;
        operation
    }

    /// Two bytes made of the same nibble four times
    fn can_compress_to_2_in_1_byte(&self, cursor: usize, out_result: &mut CompOp) -> bool {
        if cursor + 1 >= self.uncompressed_data.len() {
            return false;
        }

        let both_bytes = ((self.uncompressed_data[cursor] as u16) << 8)
            | (self.uncompressed_data[cursor + 1] as u16);
        let low = (both_bytes & 0x0F) as u8;

        if (0..4).any(|i| ((both_bytes >> (4 * i)) & 0x0F) as u8 != low) {
            return false;
        }

        out_result.low_nibble = low;
        out_result.op_type = Operation::CopyNybble4Times;
        true
    }

    /// Two bytes where three nibbles match and the fourth differs by exactly one
    fn can_compress_to_2_in_1_byte_with_manipulation(
        &self,
        cursor: usize,
        out_result: &mut CompOp,
    ) -> bool {
        if cursor + 1 >= self.uncompressed_data.len() {
            return false;
        }

        let byte1 = self.uncompressed_data[cursor];
        let byte2 = self.uncompressed_data[cursor + 1];
        let nibbles = [
            (byte1 >> 4) & 0x0F,
            byte1 & 0x0F,
            (byte2 >> 4) & 0x0F,
            byte2 & 0x0F,
        ];

        let mut nibble_matches = [0u8; 4];
        for i in 0..4 {
            nibble_matches[i] = nibbles.iter().filter(|&&n| n == nibbles[i]).count() as u8;
        }

        if nibble_matches.iter().filter(|&&count| count == 3).count() < 3 {
            return false;
        }

        let (Some(&min_val), Some(&max_val)) = (nibbles.iter().min(), nibbles.iter().max()) else {
            return false;
        };
        if max_val - min_val != 1 {
            return false;
        }

        let Some(min_idx) = nibbles.iter().position(|&x| x == min_val) else {
            return false;
        };
        let Some(max_idx) = nibbles.iter().position(|&x| x == max_val) else {
            return false;
        };

        if nibble_matches[min_idx] == 1 {
            // One nibble is smaller than the rest
            out_result.op_type = match min_idx {
                0 => Operation::CopyNybble4TimesExIncrallDecrnybble0,
                1 => Operation::CopyNybble4TimesExDecrnybble1,
                2 => Operation::CopyNybble4TimesExDecrnybble2,
                _ => Operation::CopyNybble4TimesExDecrnybble3,
            };
            out_result.low_nibble = if min_idx == 0 { min_val } else { min_val + 1 };
            true
        } else if nibble_matches[max_idx] == 1 {
            // One nibble is larger than the rest
            out_result.op_type = match max_idx {
                0 => Operation::CopyNybble4TimesExDecrallIncrnybble0,
                1 => Operation::CopyNybble4TimesExIncrnybble1,
                2 => Operation::CopyNybble4TimesExIncrnybble2,
                _ => Operation::CopyNybble4TimesExIncrnybble3,
            };
            out_result.low_nibble = if max_idx == 0 { max_val } else { max_val - 1 };
            true
        } else {
            false
        }
    }

    fn can_use_a_matching_sequence(&mut self, cursor: usize, out_result: &mut CompOp) -> bool {
        let input_size = self.uncompressed_data.len();
        let lb_buffer_begin = cursor.saturating_sub(PX_LOOKBACK_BUFFER_SIZE);
        let seq_end = adv_as_much_as_possible(cursor, input_size, PX_MAX_MATCH_SEQLEN);

        if seq_end - cursor < PX_MIN_MATCH_SEQLEN {
            return false;
        }

        let result = self.find_longest_matching_sequence(lb_buffer_begin, cursor, cursor, seq_end);
        if result.length < PX_MIN_MATCH_SEQLEN {
            return false;
        }

        // Lengths are stored minus 3
        let valid_high_nibble = (result.length - PX_MIN_MATCH_SEQLEN) as u8;

        out_result.high_nibble = if self.check_sequence_high_nibble_valid_or_add(valid_high_nibble)
        {
            valid_high_nibble
        } else {
            // Table is full, fall back to the longest registered length that still fits
            self.high_nibble_lengths_possible
                .iter()
                .copied()
                .filter(|&len| (len as usize + PX_MIN_MATCH_SEQLEN) < result.length)
                .max()
                .unwrap_or(0)
        };

        let signed_offset = -((cursor - result.pos) as i32);
        out_result.low_nibble = ((signed_offset >> 8) & 0x0F) as u8;
        out_result.next_byte_value = (signed_offset & 0xFF) as u8;
        out_result.op_type = Operation::CopySequence;
        true
    }

    fn find_longest_matching_sequence(
        &self,
        search_beg: usize,
        search_end: usize,
        to_find_beg: usize,
        to_find_end: usize,
    ) -> MatchingSeq {
        let data = self.uncompressed_data;
        let mut longest_match = MatchingSeq {
            pos: search_end,
            length: 0,
        };

        if to_find_beg + PX_MIN_MATCH_SEQLEN > to_find_end {
            return longest_match;
        }

        let min_seq = &data[to_find_beg..to_find_beg + PX_MIN_MATCH_SEQLEN];
        let last_start = search_end.saturating_sub(PX_MIN_MATCH_SEQLEN - 1);

        for pos in search_beg..last_start {
            if &data[pos..pos + PX_MIN_MATCH_SEQLEN] != min_seq {
                continue;
            }

            let nb_matches = count_equal_consecutive_elem(
                data,
                pos,
                adv_as_much_as_possible(pos, search_end, PX_MAX_MATCH_SEQLEN),
                to_find_beg,
                to_find_end,
            );

            if longest_match.length < nb_matches {
                longest_match.length = nb_matches;
                longest_match.pos = pos;
            }
            if nb_matches == PX_MAX_MATCH_SEQLEN {
                break;
            }
        }

        longest_match
    }

    fn check_sequence_high_nibble_valid_or_add(&mut self, hnibble_or_len: u8) -> bool {
        if self.high_nibble_lengths_possible.contains(&hnibble_or_len) {
            return true;
        }
        if self.high_nibble_lengths_possible.len() < PX_NB_POSSIBLE_SEQUENCES_LEN {
            self.high_nibble_lengths_possible.push(hnibble_or_len);
            self.high_nibble_lengths_possible.sort_unstable();
            return true;
        }
        false
    }

    /// Control flags are the nibble values not reserved for sequence lengths
    fn build_ctrl_flags_list(&mut self) {
        for nibble_val in 0..0xF {
            if self.high_nibble_lengths_possible.len() >= PX_NB_POSSIBLE_SEQUENCES_LEN {
                break;
            }
            if !self.high_nibble_lengths_possible.contains(&nibble_val) {
                self.high_nibble_lengths_possible.push(nibble_val);
            }
        }

        let mut ctrl_flag_insert = 0;
        for flag_val in 0..0xF {
            if ctrl_flag_insert >= PX_CONTROL_FLAG_COUNT {
                break;
            }
            if !self.high_nibble_lengths_possible.contains(&flag_val) {
                self.control_flags[ctrl_flag_insert] = flag_val;
                ctrl_flag_insert += 1;
            }
        }
    }

    fn output_an_operation(&mut self, operation: &CompOp) {
        match operation.op_type {
            Operation::CopyAsIs => {
                self.compressed_data
                    .push((operation.high_nibble << 4) | operation.low_nibble);
            }
            Operation::CopySequence => {
                self.compressed_data
                    .push((operation.high_nibble << 4) | operation.low_nibble);
                self.compressed_data.push(operation.next_byte_value);
            }
            pattern => {
                let flag = self.control_flags[pattern as usize];
                self.compressed_data.push((flag << 4) | operation.low_nibble);
            }
        }
    }

    fn output_all_operations(&mut self) {
        while !self.pending_operations.is_empty() {
            let mut command_byte = 0u8;
            for (i, op) in self.pending_operations.iter().take(8).enumerate() {
                if op.op_type == Operation::CopyAsIs {
                    command_byte |= 1 << (7 - i);
                }
            }
            self.compressed_data.push(command_byte);

            for _ in 0..8 {
                match self.pending_operations.pop_front() {
                    Some(op) => self.output_an_operation(&op),
                    None => break,
                }
            }
        }
    }
}

fn adv_as_much_as_possible(iter: usize, iter_end: usize, displacement: usize) -> usize {
    (iter + displacement).min(iter_end)
}

fn count_equal_consecutive_elem(
    data: &[u8],
    first_1: usize,
    last_1: usize,
    first_2: usize,
    last_2: usize,
) -> usize {
    data[first_1..last_1]
        .iter()
        .zip(&data[first_2..last_2])
        .take_while(|(a, b)| a == b)
        .count()
}

pub struct PxDecompressor<'a> {
    compressed_data: &'a [u8],
    flags: &'a [u8],
    cursor: usize,
    uncompressed_data: Vec<u8>,
}

impl<'a> PxDecompressor<'a> {
    pub fn new(compressed_data: &'a [u8], flags: &'a [u8]) -> Self {
        PxDecompressor {
            compressed_data,
            flags,
            cursor: 0,
            uncompressed_data: Vec::new(),
        }
    }

    pub fn decompress(&mut self) -> Result<Vec<u8>, String> {
        self.cursor = 0;
        self.uncompressed_data = Vec::new();

        while self.cursor < self.compressed_data.len() {
            self.handle_control_byte()?;
        }

        Ok(std::mem::take(&mut self.uncompressed_data))
    }

    fn handle_control_byte(&mut self) -> Result<(), String> {
        let ctrl_byte = self.read_next_byte()?;

        for bit_pos in 0..8 {
            if self.cursor >= self.compressed_data.len() {
                break;
            }

            if ctrl_byte & (1 << (7 - bit_pos)) != 0 {
                let next_byte = self.read_next_byte()?;
                self.uncompressed_data.push(next_byte);
            } else {
                self.handle_special_case()?;
            }
        }

        Ok(())
    }

    fn handle_special_case(&mut self) -> Result<(), String> {
        let next_byte = self.read_next_byte()?;
        let high_nibble = (next_byte >> 4) & 0x0F;
        let low_nibble = next_byte & 0x0F;

        match self.flags.iter().position(|&flag| flag == high_nibble) {
            Some(idx) => {
                let pattern = compute_four_nibbles_pattern(idx, low_nibble);
                self.uncompressed_data.extend_from_slice(&pattern);
                Ok(())
            }
            None => self.copy_sequence(low_nibble, high_nibble),
        }
    }

    fn read_next_byte(&mut self) -> Result<u8, String> {
        let b = *self
            .compressed_data
            .get(self.cursor)
            .ok_or_else(|| "Unexpected end of compressed data".to_string())?;
        self.cursor += 1;
        Ok(b)
    }

    fn copy_sequence(&mut self, low_nibble: u8, high_nibble: u8) -> Result<(), String> {
        let offset_byte = self.read_next_byte()?;

        // Always negative: -0x1000 + 0xLBB
        let back = PX_LOOKBACK_BUFFER_SIZE - (((low_nibble as usize) << 8) | offset_byte as usize);
        let out_cur_byte = self.uncompressed_data.len();

        if back > out_cur_byte {
            return Err(format!(
                "Sequence to copy out of bound! Expected max. {} but got {}",
                out_cur_byte, back
            ));
        }

        let copy_pos = out_cur_byte - back;
        let bytes_to_copy = high_nibble as usize + PX_MIN_MATCH_SEQLEN;
        for i in 0..bytes_to_copy {
            let byte = self.uncompressed_data[copy_pos + i];
            self.uncompressed_data.push(byte);
        }

        Ok(())
    }
}

/// Expands one of the nine nibble patterns into two bytes
fn compute_four_nibbles_pattern(idx_ctrl_flags: usize, low_nibble: u8) -> [u8; 2] {
    if idx_ctrl_flags == 0 {
        let byte_val = (low_nibble << 4) | low_nibble;
        return [byte_val, byte_val];
    }

    let nibble_base = match idx_ctrl_flags {
        1 => low_nibble.wrapping_add(1),
        5 => low_nibble.wrapping_sub(1),
        _ => low_nibble,
    };

    let mut ns = [nibble_base; 4];
    match idx_ctrl_flags {
        1..=4 => ns[idx_ctrl_flags - 1] = ns[idx_ctrl_flags - 1].wrapping_sub(1),
        _ => ns[idx_ctrl_flags - 5] = ns[idx_ctrl_flags - 5].wrapping_add(1),
    }

    [
        ((ns[0] & 0x0F) << 4) | (ns[1] & 0x0F),
        ((ns[2] & 0x0F) << 4) | (ns[3] & 0x0F),
    ]
}

pub struct PxHandler;

impl PxHandler {
    pub fn decompress(compressed_data: &[u8], flags: &[u8]) -> Result<Vec<u8>, String> {
        PxDecompressor::new(compressed_data, flags).decompress()
    }

    pub fn compress(
        uncompressed_data: &[u8],
        level: PXCompLevel,
        search_first: bool,
    ) -> Result<PxCompressed, String> {
        PxCompressor::new(uncompressed_data, level, search_first).compress()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(data: &[u8], level: PXCompLevel, search_first: bool) {
        let compressed = PxHandler::compress(data, level, search_first).unwrap();
        let restored = PxHandler::decompress(&compressed.data, &compressed.control_flags).unwrap();
        assert_eq!(restored, data, "level {:?}, search_first {}", level, search_first);
    }

    fn sample_tiles() -> Vec<u8> {
        // Mix of flat areas, near-flat patterns and repeated runs
        let mut data = vec![0u8; 160];
        data.extend(std::iter::repeat(0x11).take(64));
        data.extend_from_slice(&[0x12, 0x22, 0x21, 0x11, 0x34, 0x43, 0x56, 0x65]);
        for i in 0..200u32 {
            data.push(((i * 7 + i / 3) % 256) as u8);
        }
        data.extend_from_slice(&[0xAB, 0xCD, 0xEF, 0xAB, 0xCD, 0xEF, 0xAB, 0xCD]);
        data.resize(800, 0xF0);
        data
    }

    #[test]
    fn all_levels_restore_input() {
        let data = sample_tiles();
        for level in [
            PXCompLevel::Level0,
            PXCompLevel::Level1,
            PXCompLevel::Level2,
            PXCompLevel::Level3,
        ] {
            roundtrip(&data, level, true);
            roundtrip(&data, level, false);
        }
    }

    #[test]
    fn level3_is_smaller_than_level0() {
        let data = sample_tiles();
        let stored = PxHandler::compress(&data, PXCompLevel::Level0, true).unwrap();
        let packed = PxHandler::compress(&data, PXCompLevel::Level3, true).unwrap();
        assert!(packed.data.len() < stored.data.len());
    }

    #[test]
    fn control_flags_never_collide_with_sequence_lengths() {
        let data = sample_tiles();
        let packed = PxHandler::compress(&data, PXCompLevel::Level3, true).unwrap();
        assert!(!packed.control_flags.contains(&0xF));
        let mut flags = packed.control_flags.to_vec();
        flags.sort_unstable();
        flags.dedup();
        assert_eq!(flags.len(), PX_CONTROL_FLAG_COUNT);
    }

    #[test]
    fn nibble_patterns_match_documented_layout() {
        assert_eq!(compute_four_nibbles_pattern(0, 0x3), [0x33, 0x33]);
        assert_eq!(compute_four_nibbles_pattern(1, 0x3), [0x34, 0x44]);
        assert_eq!(compute_four_nibbles_pattern(3, 0x3), [0x33, 0x23]);
        assert_eq!(compute_four_nibbles_pattern(5, 0x3), [0x32, 0x22]);
        assert_eq!(compute_four_nibbles_pattern(8, 0x3), [0x33, 0x34]);
    }

    #[test]
    fn truncated_stream_is_an_error() {
        // Command byte says "pattern or sequence" but the offset byte is missing
        let flags = [0u8; PX_CONTROL_FLAG_COUNT];
        assert!(PxHandler::decompress(&[0x00, 0xF0], &flags).is_err());
    }

    #[test]
    fn lookback_before_start_is_an_error() {
        let flags = [1, 2, 3, 4, 5, 6, 7, 8, 9];
        // Sequence op with high nibble 0 (not a flag) pointing 0x1000 back on empty output
        assert!(PxHandler::decompress(&[0x00, 0x00, 0x00], &flags).is_err());
    }
}
