//! Geographic allow-lists for the shipping policy.
//!
//! The shop ships to mainland Spain and the Balearic Islands only. The
//! Canary Islands, Ceuta, and Melilla are excluded, which shows up here as
//! postal-code prefixes `35`, `51`, and `52` being absent from the
//! allow-list (`38` is grandfathered in from the original policy).

/// The only country the shop ships to.
pub const SHIPPING_COUNTRY: &str = "España";

/// Spanish provinces eligible for shipping: the 47 mainland provinces
/// plus the Balearic Islands.
pub const SPAIN_PROVINCES: [&str; 48] = [
    "Álava",
    "Albacete",
    "Alicante",
    "Almería",
    "Asturias",
    "Ávila",
    "Badajoz",
    "Barcelona",
    "Burgos",
    "Cáceres",
    "Cádiz",
    "Cantabria",
    "Castellón",
    "Ciudad Real",
    "Córdoba",
    "Cuenca",
    "Girona",
    "Granada",
    "Guadalajara",
    "Guipúzcoa",
    "Huelva",
    "Huesca",
    "Islas Baleares",
    "Jaén",
    "La Coruña",
    "La Rioja",
    "León",
    "Lleida",
    "Lugo",
    "Madrid",
    "Málaga",
    "Murcia",
    "Navarra",
    "Ourense",
    "Palencia",
    "Pontevedra",
    "Salamanca",
    "Segovia",
    "Sevilla",
    "Soria",
    "Tarragona",
    "Teruel",
    "Toledo",
    "Valencia",
    "Valladolid",
    "Vizcaya",
    "Zamora",
    "Zaragoza",
];

/// Two-digit postal-code prefixes eligible for shipping.
///
/// 01-34 and 36-50; prefix 35 (Las Palmas) is deliberately omitted.
pub const ALLOWED_POSTAL_CODE_PREFIXES: [&str; 49] = [
    "01", "02", "03", "04", "05", "06", "07", "08", "09", "10", //
    "11", "12", "13", "14", "15", "16", "17", "18", "19", "20", //
    "21", "22", "23", "24", "25", "26", "27", "28", "29", "30", //
    "31", "32", "33", "34", "36", "37", "38", "39", "40", "41", //
    "42", "43", "44", "45", "46", "47", "48", "49", "50",
];

/// Whether the province is in the shipping allow-list.
#[must_use]
pub fn is_allowed_province(province: &str) -> bool {
    SPAIN_PROVINCES.contains(&province)
}

/// Whether the postal code is shippable.
///
/// The code must be exactly five ASCII digits and its two-digit prefix
/// must be in the allow-list.
#[must_use]
pub fn is_allowed_postal_code(postal_code: &str) -> bool {
    if postal_code.len() != 5 || !postal_code.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    postal_code
        .get(..2)
        .is_some_and(|prefix| ALLOWED_POSTAL_CODE_PREFIXES.contains(&prefix))
}
