use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::NaiveDate;
use jsonschema::{Draft, JSONSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::HarnessError;
use crate::functions::{json_schema_for, FunctionCall, FunctionDefinition, FunctionParameter, Tool};

pub const FIND_HOTELS: &str = "FindHotels";
pub const MAKE_RESERVATION: &str = "MakeReservation";
pub const GET_HOTEL_PRICE_PER_NIGHT: &str = "GetHotelPricePerNight";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hotel {
    pub id: String,
    pub name: String,
    pub location: String,
    pub price_per_night: f64,
}

impl Hotel {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        location: impl Into<String>,
        price_per_night: f64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            location: location.into(),
            price_per_night,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub hotel_name: String,
    pub guest_name: String,
    pub checkin_date: NaiveDate,
    pub checkout_date: NaiveDate,
    pub guests: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuery {
    pub hotel_name: String,
    pub checkin_date: NaiveDate,
    pub checkout_date: NaiveDate,
}

/// The host functions the assistant is allowed to call.
#[async_trait]
pub trait HotelBackend: Send + Sync {
    async fn find_hotels(&self, location: &str) -> Vec<Hotel>;

    async fn make_reservation(&self, reservation: &Reservation) -> bool;

    /// `None` when the hotel is unknown.
    async fn get_hotel_price_per_night(&self, query: &PriceQuery) -> Option<f64>;
}

/// Every call the in-memory backend received, in order per function.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendCalls {
    pub find_hotels: Vec<String>,
    pub make_reservation: Vec<Reservation>,
    pub get_hotel_price_per_night: Vec<PriceQuery>,
}

/// A fixed hotel list that records every call made against it.
#[derive(Debug, Default)]
pub struct InMemoryHotelBackend {
    hotels: Vec<Hotel>,
    calls: Mutex<BackendCalls>,
}

impl InMemoryHotelBackend {
    pub fn new(hotels: Vec<Hotel>) -> Self {
        Self {
            hotels,
            calls: Mutex::new(BackendCalls::default()),
        }
    }

    pub fn with_default_hotels() -> Self {
        Self::new(default_hotels())
    }

    pub fn hotels(&self) -> &[Hotel] {
        &self.hotels
    }

    pub fn calls(&self) -> BackendCalls {
        self.lock_calls().clone()
    }

    fn lock_calls(&self) -> MutexGuard<'_, BackendCalls> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn hotel_named(&self, name: &str) -> Option<&Hotel> {
        self.hotels
            .iter()
            .find(|hotel| hotel.name.eq_ignore_ascii_case(name.trim()))
    }
}

#[async_trait]
impl HotelBackend for InMemoryHotelBackend {
    async fn find_hotels(&self, location: &str) -> Vec<Hotel> {
        self.lock_calls().find_hotels.push(location.to_string());
        let needle = location.trim().to_lowercase();
        self.hotels
            .iter()
            .filter(|hotel| hotel.location.to_lowercase().contains(&needle))
            .cloned()
            .collect()
    }

    async fn make_reservation(&self, reservation: &Reservation) -> bool {
        self.lock_calls().make_reservation.push(reservation.clone());
        self.hotel_named(&reservation.hotel_name).is_some()
            && reservation.checkout_date > reservation.checkin_date
    }

    async fn get_hotel_price_per_night(&self, query: &PriceQuery) -> Option<f64> {
        self.lock_calls().get_hotel_price_per_night.push(query.clone());
        self.hotel_named(&query.hotel_name)
            .map(|hotel| hotel.price_per_night)
    }
}

pub fn default_hotels() -> Vec<Hotel> {
    vec![
        Hotel::new("1", "Kensington Hotel", "London", 300.0),
        Hotel::new("2", "Notting Hill Hotel", "London", 400.0),
        Hotel::new("3", "Hotel du Louvre", "Paris", 350.0),
        Hotel::new("4", "Le Marais Boutique", "Paris", 220.0),
    ]
}

fn date_parameter(name: &str, description: &str) -> FunctionParameter {
    FunctionParameter::new(name, json_schema_for::<String>()).with_description(description)
}

/// The tool declarations offered to the assistant, in a fixed order.
pub fn hotel_tools() -> Vec<Tool> {
    vec![
        FunctionDefinition::new(FIND_HOTELS)
            .with_description("Find hotels in a given location.")
            .with_parameter(
                FunctionParameter::new("location", json_schema_for::<String>())
                    .with_description("the city to search hotels in"),
            )
            .to_tool(),
        FunctionDefinition::new(MAKE_RESERVATION)
            .with_description("Books a room in a hotel for a specified guest and date range.")
            .with_parameter(
                FunctionParameter::new("hotel_name", json_schema_for::<String>())
                    .with_description("the name of the hotel, exactly as returned by FindHotels"),
            )
            .with_parameter(
                FunctionParameter::new("guest_name", json_schema_for::<String>())
                    .with_description("the name of the guest"),
            )
            .with_parameter(date_parameter(
                "checkin_date",
                "the start date of the reservation (YYYY-MM-DD)",
            ))
            .with_parameter(date_parameter(
                "checkout_date",
                "the end date of the reservation (YYYY-MM-DD)",
            ))
            .with_parameter(
                FunctionParameter::new("guests", json_schema_for::<u32>())
                    .with_description("the number of guests"),
            )
            .to_tool(),
        FunctionDefinition::new(GET_HOTEL_PRICE_PER_NIGHT)
            .with_description("Gets the price per night of a hotel.")
            .with_parameter(
                FunctionParameter::new("hotel_name", json_schema_for::<String>())
                    .with_description("the name of the hotel"),
            )
            .with_parameter(date_parameter(
                "checkin_date",
                "the start date of the reservation (YYYY-MM-DD)",
            ))
            .with_parameter(date_parameter(
                "checkout_date",
                "the end date of the reservation (YYYY-MM-DD)",
            ))
            .to_tool(),
    ]
}

/// A validated call to one of the hotel tools.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInvocation {
    FindHotels { location: String },
    MakeReservation(Reservation),
    GetHotelPricePerNight(PriceQuery),
}

#[derive(Deserialize)]
struct FindHotelsArgs {
    location: String,
}

#[derive(Deserialize)]
struct MakeReservationArgs {
    hotel_name: String,
    guest_name: String,
    checkin_date: String,
    checkout_date: String,
    guests: u32,
}

#[derive(Deserialize)]
struct PriceArgs {
    hotel_name: String,
    checkin_date: String,
    checkout_date: String,
}

impl ToolInvocation {
    pub fn name(&self) -> &'static str {
        match self {
            ToolInvocation::FindHotels { .. } => FIND_HOTELS,
            ToolInvocation::MakeReservation(_) => MAKE_RESERVATION,
            ToolInvocation::GetHotelPricePerNight(_) => GET_HOTEL_PRICE_PER_NIGHT,
        }
    }

    /// Resolves a model-issued call against the declared tools.
    ///
    /// Unknown names fail with `UnknownTool`. Malformed JSON, arguments that
    /// do not match the declared schema, and dates that are not `YYYY-MM-DD`
    /// fail with `ArgumentParse`.
    pub fn parse(call: &FunctionCall) -> Result<Self, HarnessError> {
        let tools = hotel_tools();
        let tool = tools
            .iter()
            .find(|tool| tool.function.name == call.name)
            .ok_or_else(|| HarnessError::UnknownTool(call.name.clone()))?;

        let arguments = call
            .arguments_value()
            .map_err(|error| HarnessError::argument_parse(&call.name, error.to_string()))?;
        validate_arguments(&call.name, &tool.function.parameters, &arguments)?;

        let invocation = match call.name.as_str() {
            FIND_HOTELS => {
                let args: FindHotelsArgs = from_arguments(&call.name, arguments)?;
                ToolInvocation::FindHotels {
                    location: args.location,
                }
            }
            MAKE_RESERVATION => {
                let args: MakeReservationArgs = from_arguments(&call.name, arguments)?;
                ToolInvocation::MakeReservation(Reservation {
                    checkin_date: parse_iso_date(&call.name, "checkin_date", &args.checkin_date)?,
                    checkout_date: parse_iso_date(
                        &call.name,
                        "checkout_date",
                        &args.checkout_date,
                    )?,
                    hotel_name: args.hotel_name,
                    guest_name: args.guest_name,
                    guests: args.guests,
                })
            }
            GET_HOTEL_PRICE_PER_NIGHT => {
                let args: PriceArgs = from_arguments(&call.name, arguments)?;
                ToolInvocation::GetHotelPricePerNight(PriceQuery {
                    checkin_date: parse_iso_date(&call.name, "checkin_date", &args.checkin_date)?,
                    checkout_date: parse_iso_date(
                        &call.name,
                        "checkout_date",
                        &args.checkout_date,
                    )?,
                    hotel_name: args.hotel_name,
                })
            }
            other => return Err(HarnessError::UnknownTool(other.to_string())),
        };
        Ok(invocation)
    }

    /// Calls the host function once and renders its result for the model.
    pub async fn invoke(&self, backend: &dyn HotelBackend) -> Result<String, HarnessError> {
        info!(tool = self.name(), "invoking host function");
        match self {
            ToolInvocation::FindHotels { location } => {
                let hotels = backend.find_hotels(location).await;
                Ok(serde_json::to_string(&hotels)?)
            }
            ToolInvocation::MakeReservation(reservation) => {
                let result = backend.make_reservation(reservation).await;
                Ok(format!(
                    "The reservation for {} at {} was successful: {result}",
                    reservation.guest_name, reservation.hotel_name
                ))
            }
            ToolInvocation::GetHotelPricePerNight(query) => {
                match backend.get_hotel_price_per_night(query).await {
                    Some(price) => Ok(format!(
                        "The price per night at {} is ${price}",
                        query.hotel_name
                    )),
                    None => Ok(format!("The hotel {} is not known", query.hotel_name)),
                }
            }
        }
    }
}

fn validate_arguments(
    tool: &str,
    parameters: &crate::functions::FunctionParameters,
    arguments: &Value,
) -> Result<(), HarnessError> {
    let schema = serde_json::to_value(parameters)?;
    let compiled = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&schema)
        .map_err(|error| HarnessError::argument_parse(tool, format!("invalid schema: {error}")))?;

    if let Err(errors) = compiled.validate(arguments) {
        let message = errors
            .map(|error| error.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(HarnessError::argument_parse(tool, message));
    }
    Ok(())
}

fn from_arguments<T: serde::de::DeserializeOwned>(
    tool: &str,
    arguments: Value,
) -> Result<T, HarnessError> {
    serde_json::from_value(arguments)
        .map_err(|error| HarnessError::argument_parse(tool, error.to_string()))
}

/// Strict `YYYY-MM-DD`; chrono alone would also accept unpadded fields.
pub fn parse_iso_date(tool: &str, field: &str, value: &str) -> Result<NaiveDate, HarnessError> {
    let bytes = value.as_bytes();
    let shaped = bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(index, byte)| index == 4 || index == 7 || byte.is_ascii_digit());
    if !shaped {
        return Err(HarnessError::argument_parse(
            tool,
            format!("{field} must be YYYY-MM-DD, got '{value}'"),
        ));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|error| {
        HarnessError::argument_parse(tool, format!("{field} '{value}' is not a date: {error}"))
    })
}
