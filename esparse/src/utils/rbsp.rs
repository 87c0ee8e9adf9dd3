//! Annex B helpers shared by the NAL and VC-1 parsers.

/// Removes `0x03` emulation prevention bytes that follow two zero bytes.
pub fn remove_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0;

    for &byte in data {
        if zeros >= 2 && byte == 0x03 {
            zeros = 0;
            continue;
        }

        zeros = if byte == 0 { zeros + 1 } else { 0 };
        out.push(byte);
    }

    out
}

/// Finds the next `00 00 01` start code prefix at or after `from`.
pub fn find_start_code(data: &[u8], from: usize) -> Option<usize> {
    if data.len() < 3 {
        return None;
    }

    let mut i = from;
    while i + 2 < data.len() {
        match data[i + 2] {
            0x01 if data[i] == 0 && data[i + 1] == 0 => return Some(i),
            0x00 => i += 1,
            _ => i += 3,
        }
    }

    None
}

/// Length of the start code at the beginning of `data` including any
/// leading zero bytes, 0 if there is none.
pub fn start_code_len(data: &[u8]) -> usize {
    let zeros = data.iter().take_while(|&&b| b == 0).count();
    if zeros >= 2 && data.get(zeros) == Some(&1) {
        zeros + 1
    } else {
        0
    }
}

/// Strips trailing zero bytes that belong to the next start code.
pub fn trim_trailing_zeros(data: &[u8]) -> &[u8] {
    let end = data.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
    &data[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emulation_prevention() {
        assert_eq!(
            remove_emulation_prevention(&[0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03]),
            vec![0x00, 0x00, 0x01, 0x00, 0x00]
        );
        assert_eq!(
            remove_emulation_prevention(&[0x00, 0x03, 0x00, 0x00, 0x03, 0x03]),
            vec![0x00, 0x03, 0x00, 0x00, 0x03]
        );
    }

    #[test]
    fn start_codes() {
        let data = [0xFF, 0x00, 0x00, 0x00, 0x01, 0x67, 0x00, 0x00, 0x01, 0x68];
        assert_eq!(find_start_code(&data, 0), Some(2));
        assert_eq!(find_start_code(&data, 3), Some(6));
        assert_eq!(find_start_code(&data, 7), None);
        assert_eq!(start_code_len(&data[1..]), 4);
        assert_eq!(start_code_len(&data[2..]), 3);
        assert_eq!(start_code_len(&data[5..]), 0);
        assert_eq!(start_code_len(&[0, 0, 0, 0, 0, 1]), 6);
        assert_eq!(start_code_len(&[0, 1]), 0);
        assert_eq!(trim_trailing_zeros(&[1, 0, 2, 0, 0]), &[1, 0, 2]);
    }
}
