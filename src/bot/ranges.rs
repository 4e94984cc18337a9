/// Convierte posiciones de usuario (base 1) en pares `(inicio, cantidad)` base 0.
///
/// `"4, 8-12, 16"` → `[(3, 1), (7, 5), (15, 1)]`. Las partes no numéricas o
/// no positivas se descartan y los rangos invertidos se normalizan.
pub fn parse_ranges(input: &str) -> Vec<(usize, usize)> {
    input
        .split(',')
        .filter_map(|part| {
            let bounds: Vec<usize> = part
                .split('-')
                .filter_map(|number| leading_integer(number.trim()))
                .filter(|number| *number > 0)
                .collect();

            let (first, last) = (*bounds.first()?, *bounds.last()?);
            let start = first.min(last);
            let end = first.max(last);
            Some((start - 1, end - (start - 1)))
        })
        .collect()
}

/// Entero al inicio del texto, como hace un parse tolerante (`"12abc"` → 12).
fn leading_integer(text: &str) -> Option<usize> {
    let digits: &str = text
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map_or(text, |(end, _)| &text[..end]);
    digits.parse().ok()
}
